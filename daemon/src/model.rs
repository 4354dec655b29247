/// Workload the target currently reports, e.g. the model loaded by `ollama ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveModel {
    pub name: String,
}

/// Parses tabular "list active sessions" output: a header line followed by one
/// row per session. The first column of the first row is the model name.
pub fn parse_active_model(stdout: &str) -> Option<ActiveModel> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let _header = lines.next()?;
    let name = lines.next()?.split_whitespace().next()?;
    Some(ActiveModel {
        name: name.to_string(),
    })
}
