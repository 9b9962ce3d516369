pub fn schema() -> anyhow::Result<()> {
    let schema = stagewright_core::config::json_schema();
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
