use super::{colorize_expiry, json_pretty, Failure, EXIT_CONFIG, EXIT_SUCCESS};
use chrono::Utc;
use countersign_core::Engine;
use countersign_schema::Identity;
use regex::Regex;

pub fn run(engine: &Engine, name_pattern: Option<&str>, json: bool) -> Result<u8, Failure> {
    let filter = name_pattern
        .map(Regex::new)
        .transpose()
        .map_err(|e| Failure::new(EXIT_CONFIG, format!("invalid --name-pattern: {e}")))?;

    let identities: Vec<Identity> = engine
        .identities()?
        .into_iter()
        .filter(|id| filter.as_ref().is_none_or(|re| re.is_match(&id.name)))
        .collect();

    if json {
        println!("{}", json_pretty(&identities)?);
        return Ok(EXIT_SUCCESS);
    }

    if identities.is_empty() {
        println!("no signing identities found.");
        return Ok(EXIT_SUCCESS);
    }
    let now = Utc::now();
    for id in &identities {
        println!(
            "{}  {}  {}",
            id.fingerprint,
            colorize_expiry(id.not_after, now),
            id.name
        );
    }
    println!("\n{} identit{}", identities.len(), if identities.len() == 1 { "y" } else { "ies" });
    Ok(EXIT_SUCCESS)
}
