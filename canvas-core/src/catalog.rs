use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Course {
    pub id: u64,
    pub name: String,
}

/// A folder in a course's file tree. `full_name` starts with the root
/// folder ("course files") followed by the nested path.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Folder {
    pub id: u64,
    pub full_name: String,
}

/// A file record. Locked or otherwise unavailable files come back with an
/// empty `url`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {
    pub id: u64,
    pub folder_id: u64,
    pub display_name: String,
    #[serde(default)]
    pub url: String,
    pub modified_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Module {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleItem {
    pub id: u64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ModuleItemKind,
    pub position: u32,
    #[serde(default)]
    pub indent: u32,
    /// API url of the linked object; for `File` items this is the file record.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum ModuleItemKind {
    File,
    SubHeader,
    /// Pages, assignments, quizzes, discussions, external urls and tools.
    #[serde(other)]
    Link,
}

impl ModuleItem {
    /// Where a link-style item should point when materialized as a shortcut.
    pub fn link_target(&self) -> Option<&str> {
        self.html_url
            .as_deref()
            .or(self.external_url.as_deref())
            .filter(|target| !target.is_empty())
    }
}
