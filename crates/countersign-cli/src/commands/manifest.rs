use super::{colorize_expiry, json_pretty, Failure, EXIT_SUCCESS};
use chrono::Utc;
use countersign_core::Engine;
use countersign_schema::{materialize, DEBUG_ALLOW_KEY};
use plist::Value;
use std::path::Path;

fn describe(value: &Value) -> String {
    match value {
        Value::Boolean(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(describe).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Dictionary(d) => format!("{{{} keys}}", d.len()),
        Value::Data(d) => format!("<{} bytes>", d.len()),
        other => format!("{other:?}"),
    }
}

pub fn run(engine: &Engine, path: &Path, json: bool) -> Result<u8, Failure> {
    let manifest = engine.inspect_manifest(path)?;
    let effective = materialize(&manifest.entitlements);

    if json {
        let payload = serde_json::json!({
            "name": manifest.name,
            "uuid": manifest.uuid,
            "team_ids": manifest.team_ids,
            "expiration": manifest.expiration,
            "entitlements": manifest.entitlements,
            "effective_entitlements": effective,
            "authorized_fingerprints": manifest.authorized_fingerprints,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    let teams: Vec<&str> = manifest.team_ids.iter().map(|t| t.as_str()).collect();
    println!("name:        {}", manifest.name.as_deref().unwrap_or("(none)"));
    println!(
        "uuid:        {}",
        manifest.uuid.as_ref().map_or("(none)", |u| u.as_str())
    );
    println!("teams:       {}", if teams.is_empty() { "(none)".to_owned() } else { teams.join(", ") });
    println!("expires:     {}", colorize_expiry(manifest.expiration, Utc::now()));
    println!("entitlements:");
    for (key, value) in &manifest.entitlements {
        let note = if key == DEBUG_ALLOW_KEY {
            "  (forced to false when signing)"
        } else {
            ""
        };
        println!("  {key} = {}{note}", describe(value));
    }
    if !manifest.entitlements.contains_key(DEBUG_ALLOW_KEY) {
        println!("  {DEBUG_ALLOW_KEY} = false  (added when signing)");
    }
    if manifest.restricts_identities() {
        println!("authorized certificates:");
        for fp in &manifest.authorized_fingerprints {
            println!("  {fp}");
        }
    } else {
        println!("authorized certificates: (unrestricted)");
    }
    Ok(EXIT_SUCCESS)
}
