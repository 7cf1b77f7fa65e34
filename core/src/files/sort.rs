//! Listing presentation helpers.
//!
//! Backends return children in whatever order the transport produces. The
//! explorer applies the user's sort order and hidden-file preference with
//! these helpers after `list_files` returns.

use serde::{Deserialize, Serialize};

use super::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortMode {
    #[default]
    Name,
    Size,
    Date,
}

/// User-facing listing preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingOptions {
    pub sort_mode: SortMode,
    pub folders_first: bool,
    pub show_hidden: bool,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            sort_mode: SortMode::Name,
            folders_first: true,
            show_hidden: true,
        }
    }
}

/// Filter and order a listing in place.
pub fn apply(entries: &mut Vec<FileEntry>, options: &ListingOptions) {
    if !options.show_hidden {
        entries.retain(|e| !e.is_hidden());
    }
    entries.sort_by(|a, b| {
        let folders = if options.folders_first {
            b.is_directory.cmp(&a.is_directory)
        } else {
            std::cmp::Ordering::Equal
        };
        let by_name = || a.name().to_lowercase().cmp(&b.name().to_lowercase());
        folders.then_with(|| match options.sort_mode {
            SortMode::Name => by_name(),
            // Largest and newest first.
            SortMode::Size => b.size.cmp(&a.size).then_with(by_name),
            SortMode::Date => b.last_modified.cmp(&a.last_modified).then_with(by_name),
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FileEntry> {
        let mut a_file = FileEntry::file("/x/a_file.txt", "local");
        a_file.size = 10;
        a_file.last_modified = 3;
        let z_dir = FileEntry::directory("/x/z_dir", "local");
        let mut b_file = FileEntry::file("/x/B_file.txt", "local");
        b_file.size = 99;
        b_file.last_modified = 1;
        let a_dir = FileEntry::directory("/x/a_dir", "local");
        let hidden = FileEntry::file("/x/.env", "local");
        vec![a_file, z_dir, b_file, a_dir, hidden]
    }

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn directories_first_then_case_insensitive_name() {
        let mut entries = sample();
        apply(&mut entries, &ListingOptions::default());
        assert_eq!(
            names(&entries),
            vec!["a_dir", "z_dir", ".env", "a_file.txt", "B_file.txt"]
        );
    }

    #[test]
    fn hide_dotfiles() {
        let mut entries = sample();
        let options = ListingOptions {
            show_hidden: false,
            ..Default::default()
        };
        apply(&mut entries, &options);
        assert!(!names(&entries).contains(&".env"));
    }

    #[test]
    fn size_order_without_folder_grouping() {
        let mut entries = sample();
        let options = ListingOptions {
            sort_mode: SortMode::Size,
            folders_first: false,
            show_hidden: false,
        };
        apply(&mut entries, &options);
        assert_eq!(names(&entries)[0], "B_file.txt");
        assert_eq!(names(&entries)[1], "a_file.txt");
    }

    #[test]
    fn date_order_newest_first() {
        let mut entries = sample();
        let options = ListingOptions {
            sort_mode: SortMode::Date,
            folders_first: false,
            show_hidden: true,
        };
        apply(&mut entries, &options);
        assert_eq!(names(&entries)[0], "a_file.txt");
    }
}
