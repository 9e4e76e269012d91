use plist::{Dictionary, Value};
use std::fs;
use std::path::Path;

/// Capability key that permits a debugger to attach at runtime.
pub const DEBUG_ALLOW_KEY: &str = "get-task-allow";

/// Final entitlements for the container signature.
///
/// Every key is copied through in order except [`DEBUG_ALLOW_KEY`], which is
/// always present and always `false`. Overwriting an existing key keeps its
/// position; a missing key is appended.
pub fn materialize(source: &Dictionary) -> Dictionary {
    let mut out = source.clone();
    out.insert(DEBUG_ALLOW_KEY.to_owned(), Value::Boolean(false));
    out
}

/// Serialize a descriptor as an XML property list, the format signing tools accept.
pub fn to_xml(entitlements: &Dictionary) -> Result<Vec<u8>, plist::Error> {
    let mut buf = Vec::new();
    Value::Dictionary(entitlements.clone()).to_writer_xml(&mut buf)?;
    Ok(buf)
}

pub fn write_descriptor(entitlements: &Dictionary, path: &Path) -> Result<(), std::io::Error> {
    let xml = to_xml(entitlements).map_err(std::io::Error::other)?;
    fs::write(path, xml)
}
