use crate::CoreError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Component directories scanned for nested code, relative to the bundle root.
const NESTED_DIRS: &[&str] = &[
    "Frameworks",
    "PlugIns",
    "Extensions",
    "Contents/Frameworks",
    "Contents/PlugIns",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NestedKind {
    Framework,
    DynamicLibrary,
    Extension,
}

impl NestedKind {
    fn classify(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "framework" => Some(Self::Framework),
            "dylib" => Some(Self::DynamicLibrary),
            "appex" => Some(Self::Extension),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NestedCodeObject {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub kind: NestedKind,
}

/// An application bundle on disk and the nested code it carries.
#[derive(Debug, Clone)]
pub struct Bundle {
    root: PathBuf,
    nested: Vec<NestedCodeObject>,
}

impl Bundle {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if !path.is_dir() {
            return Err(CoreError::BundleInvalid {
                path: path.to_path_buf(),
                reason: "not a directory".to_owned(),
            });
        }
        if path.file_name().is_none() {
            return Err(CoreError::BundleInvalid {
                path: path.to_path_buf(),
                reason: "bundle path has no directory name".to_owned(),
            });
        }
        let nested = discover_nested(path).map_err(|e| CoreError::BundleInvalid {
            path: path.to_path_buf(),
            reason: format!("scanning nested code: {e}"),
        })?;
        debug!("{} nested code object(s) in {}", nested.len(), path.display());
        Ok(Self {
            root: path.to_path_buf(),
            nested,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nested(&self) -> &[NestedCodeObject] {
        &self.nested
    }

    /// Directory name of the bundle, e.g. `Demo.app`.
    pub fn dir_name(&self) -> &std::ffi::OsStr {
        self.root.file_name().unwrap_or(self.root.as_os_str())
    }
}

/// Nested code objects one level below the known component directories,
/// sorted by relative path.
pub fn discover_nested(root: &Path) -> std::io::Result<Vec<NestedCodeObject>> {
    let mut found = Vec::new();
    for dir in NESTED_DIRS {
        let component_dir = root.join(dir);
        if !component_dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&component_dir)? {
            let path = entry?.path();
            let Some(kind) = NestedKind::classify(&path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            found.push(NestedCodeObject {
                path,
                relative,
                kind,
            });
        }
    }
    found.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_known_component_kinds_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Demo.app");
        fs::create_dir_all(app.join("Frameworks/Zed.framework")).unwrap();
        fs::create_dir_all(app.join("Frameworks/Alpha.framework")).unwrap();
        fs::write(app.join("Frameworks/libswiftCore.dylib"), b"x").unwrap();
        fs::write(app.join("Frameworks/README.txt"), b"x").unwrap();
        fs::create_dir_all(app.join("PlugIns/Share.appex")).unwrap();
        fs::create_dir_all(app.join("Resources/Hidden.framework")).unwrap();

        let bundle = Bundle::open(&app).unwrap();
        let rel: Vec<_> = bundle
            .nested()
            .iter()
            .map(|n| n.relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rel,
            [
                "Frameworks/Alpha.framework",
                "Frameworks/Zed.framework",
                "Frameworks/libswiftCore.dylib",
                "PlugIns/Share.appex",
            ]
        );
        assert_eq!(bundle.nested()[2].kind, NestedKind::DynamicLibrary);
        assert_eq!(bundle.dir_name(), "Demo.app");
    }

    #[test]
    fn does_not_recurse_past_one_level() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Deep.app");
        fs::create_dir_all(app.join("Frameworks/Outer.framework/Frameworks/Inner.framework")).unwrap();
        let nested = discover_nested(&app).unwrap();
        assert_eq!(nested.len(), 1);
        assert!(nested[0].path.ends_with("Outer.framework"));
    }

    #[test]
    fn macos_layout_is_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Tool.app");
        fs::create_dir_all(app.join("Contents/Frameworks/Kit.framework")).unwrap();
        fs::create_dir_all(app.join("Contents/PlugIns/Widget.appex")).unwrap();
        assert_eq!(discover_nested(&app).unwrap().len(), 2);
    }

    #[test]
    fn empty_bundle_has_no_nested_code() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::open(dir.path()).unwrap();
        assert!(bundle.nested().is_empty());
    }

    #[test]
    fn file_is_not_a_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("App.app");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            Bundle::open(&file),
            Err(CoreError::BundleInvalid { .. })
        ));
    }
}
