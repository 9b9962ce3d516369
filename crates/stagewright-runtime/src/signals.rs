use tokio::signal::unix::{SignalKind, signal};

use crate::launcher::Signal;

/// Install handlers for SIGTERM, SIGINT, SIGHUP and SIGQUIT, then wait for
/// the first of them. Runs on the caller's task; no threads are started.
pub async fn wait_for_termination() -> std::io::Result<Signal> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    tracing::debug!("signal handlers installed");
    let received = tokio::select! {
        _ = terminate.recv() => Signal::Terminate,
        _ = interrupt.recv() => Signal::Interrupt,
        _ = hangup.recv() => Signal::Hangup,
        _ = quit.recv() => Signal::Quit,
    };
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn returns_on_first_signal() {
        let waiter = tokio::spawn(wait_for_termination());
        // Let the task install its handlers before the signal is raised.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let pid = std::process::id().to_string();
        let status = std::process::Command::new("kill")
            .args(["-HUP", &pid])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received, Signal::Hangup);
    }
}
