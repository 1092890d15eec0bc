//! Folder priority and sent-folder heuristics, carried over from the
//! source codebase's `adapters/imap/folders.rs` (§4.3.2 Folder-List
//! strategy, §4.3.4's sent-folder lookup).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderPriority {
    High,
    Medium,
    Low,
    Excluded,
    NoSelect,
}

#[derive(Debug, Clone)]
pub struct FolderInfo {
    pub name: String,
    pub attributes: Vec<String>,
    pub priority: FolderPriority,
}

impl FolderInfo {
    pub fn new(name: impl Into<String>, attributes: Vec<String>) -> Self {
        let name = name.into();
        let priority = Self::compute_priority(&name, &attributes);
        Self {
            name,
            attributes,
            priority,
        }
    }

    fn compute_priority(name: &str, attributes: &[String]) -> FolderPriority {
        if attributes.iter().any(|a| a.contains("NoSelect")) {
            return FolderPriority::NoSelect;
        }

        for attr in attributes {
            if attr.contains("Junk") || attr.contains("Trash") {
                return FolderPriority::Excluded;
            }
        }

        if name == "INBOX" {
            return FolderPriority::High;
        }

        for attr in attributes {
            if attr.contains("Sent") || attr.contains("Drafts") {
                return FolderPriority::High;
            }
            if attr.contains("All") {
                return FolderPriority::Medium;
            }
        }

        FolderPriority::Low
    }
}

pub fn find_folder_by_attribute(folders: &[FolderInfo], attribute: &str) -> Option<String> {
    folders
        .iter()
        .find(|f| f.attributes.iter().any(|a| a.contains(attribute)))
        .map(|f| f.name.clone())
}

/// Known Sent folder names across languages and providers (RFC 6154 \Sent
/// fallback). Matched as a case-insensitive comparison against the leaf
/// segment of the folder name.
const SENT_FOLDER_NAMES: &[&str] = &[
    "sent", "sent items", "sent messages", "sent mail",
    "gesendet", "gesendete objekte", "gesendete elemente",
    "envoyés", "éléments envoyés", "messages envoyés",
    "enviados", "elementos enviados",
    "enviadas", "itens enviados",
    "inviata", "inviati",
    "verzonden", "verzonden items",
    "skickat", "skickade",
    "sendt", "sendte", "sendte elementer",
    "lähetetyt",
    "wysłane",
    "odeslané", "odeslaná pošta",
    "elküldött", "elküldött elemek",
    "trimise", "mesaje trimise",
    "отправленные",
    "gönderilenler",
    "απεσταλμένα",
];

/// Find the Sent folder by attribute first (RFC 6154 `\Sent`), then by
/// matching the folder's leaf name against `SENT_FOLDER_NAMES`.
pub fn find_sent_folder(folders: &[FolderInfo]) -> Option<String> {
    if let Some(name) = find_folder_by_attribute(folders, "Sent") {
        return Some(name);
    }

    for folder in folders {
        if folder.priority == FolderPriority::NoSelect || folder.priority == FolderPriority::Excluded
        {
            continue;
        }
        let leaf = folder
            .name
            .rsplit_once('.')
            .or_else(|| folder.name.rsplit_once('/'))
            .map(|(_, leaf)| leaf)
            .unwrap_or(&folder.name);
        let leaf_lower = leaf.to_lowercase();

        if SENT_FOLDER_NAMES.iter().any(|known| leaf_lower == *known) {
            return Some(folder.name.clone());
        }
    }

    None
}

const SKIP_ATTRIBUTES: &[&str] = &["Drafts", "Trash", "Junk", "NoSelect", "All", "Flagged"];

/// Folders eligible for the Synchronize-All pass (§4.3.4). Gmail syncs only
/// `All Mail` (contains every message exactly once); other providers skip
/// the folders in `SKIP_ATTRIBUTES`.
pub fn folders_to_sync(folders: &[FolderInfo], is_gmail: bool) -> Vec<&FolderInfo> {
    if is_gmail {
        folders
            .iter()
            .filter(|f| f.attributes.iter().any(|a| a.contains("All")))
            .collect()
    } else {
        folders
            .iter()
            .filter(|f| !f.attributes.iter().any(|attr| SKIP_ATTRIBUTES.contains(&attr.as_str())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_is_high_priority() {
        let info = FolderInfo::new("INBOX", vec![]);
        assert_eq!(info.priority, FolderPriority::High);
    }

    #[test]
    fn sent_folder_found_by_attribute_before_name_fallback() {
        let folders = vec![
            FolderInfo::new("Envoyés", vec!["\\Sent".to_string()]),
            FolderInfo::new("Sent", vec![]),
        ];
        assert_eq!(find_sent_folder(&folders), Some("Envoyés".to_string()));
    }

    #[test]
    fn sent_folder_falls_back_to_localized_name() {
        let folders = vec![FolderInfo::new("INBOX.Gesendet", vec![])];
        assert_eq!(find_sent_folder(&folders), Some("INBOX.Gesendet".to_string()));
    }

    #[test]
    fn gmail_sync_set_is_all_mail_only() {
        let folders = vec![
            FolderInfo::new("INBOX", vec![]),
            FolderInfo::new("[Gmail]/All Mail", vec!["\\All".to_string()]),
        ];
        let synced = folders_to_sync(&folders, true);
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].name, "[Gmail]/All Mail");
    }
}
