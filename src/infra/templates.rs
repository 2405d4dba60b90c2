use std::path::{Component, Path, PathBuf};

use crate::application::builder::TemplateRegistry;

/// Templates laid out as `<root>/<document_kind>/<template_name>`.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    root: PathBuf,
}

impl DirectoryTemplates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// A single normal path component; rejects separators, `..`, and absolute paths.
fn is_plain_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

impl TemplateRegistry for DirectoryTemplates {
    fn exists(&self, document_kind: &str, template_name: &str) -> bool {
        is_plain_segment(document_kind)
            && is_plain_segment(template_name)
            && self.root.join(document_kind).join(template_name).exists()
    }
}
