//! POSIX-style permission bits attached to every [`FileEntry`](super::FileEntry).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Owner/group/others × read/write/execute.
    ///
    /// Backends without permission semantics report [`Permission::EMPTY`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Permission: u16 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHERS_READ = 0o004;
        const OTHERS_WRITE = 0o002;
        const OTHERS_EXECUTE = 0o001;
    }
}

const RWX_ORDER: [(Permission, char); 9] = [
    (Permission::OWNER_READ, 'r'),
    (Permission::OWNER_WRITE, 'w'),
    (Permission::OWNER_EXECUTE, 'x'),
    (Permission::GROUP_READ, 'r'),
    (Permission::GROUP_WRITE, 'w'),
    (Permission::GROUP_EXECUTE, 'x'),
    (Permission::OTHERS_READ, 'r'),
    (Permission::OTHERS_WRITE, 'w'),
    (Permission::OTHERS_EXECUTE, 'x'),
];

impl Permission {
    /// Unknown or not applicable.
    pub const EMPTY: Permission = Permission::empty();

    /// Build from a Unix mode; file-type and setuid bits are ignored.
    pub fn from_mode(mode: u32) -> Self {
        Permission::from_bits_truncate((mode & 0o777) as u16)
    }

    pub fn mode(&self) -> u32 {
        u32::from(self.bits())
    }

    pub fn can_read(&self) -> bool {
        self.contains(Permission::OWNER_READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Permission::OWNER_WRITE)
    }

    pub fn can_execute(&self) -> bool {
        self.contains(Permission::OWNER_EXECUTE)
    }

    /// Format as `"rwxr-xr-x"`.
    pub fn to_rwx_string(&self) -> String {
        RWX_ORDER
            .iter()
            .map(|(flag, c)| if self.contains(*flag) { *c } else { '-' })
            .collect()
    }

    /// Parse an `ls -l` permission column such as `"drwxr-x---"` or
    /// `"rw-r--r--"`. Returns [`Permission::EMPTY`] for anything else.
    pub fn from_rwx_string(s: &str) -> Self {
        let chars: Vec<char> = s.chars().collect();
        let bits = match chars.len() {
            9 => &chars[..],
            10 | 11 => &chars[1..10],
            _ => return Permission::EMPTY,
        };
        let mut perm = Permission::EMPTY;
        for ((flag, expected), actual) in RWX_ORDER.iter().zip(bits) {
            // s/t replace x when setuid/sticky bits are set
            if actual == expected || (*expected == 'x' && matches!(*actual, 's' | 't')) {
                perm |= *flag;
            }
        }
        perm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_mode_masks_file_type() {
        let perm = Permission::from_mode(0o100644);
        assert_eq!(perm.mode(), 0o644);
        assert!(perm.can_read());
        assert!(perm.can_write());
        assert!(!perm.can_execute());
    }

    #[test]
    fn rwx_string_formatting() {
        assert_eq!(Permission::from_mode(0o755).to_rwx_string(), "rwxr-xr-x");
        assert_eq!(Permission::from_mode(0o600).to_rwx_string(), "rw-------");
        assert_eq!(Permission::EMPTY.to_rwx_string(), "---------");
    }

    #[test]
    fn parses_ls_columns() {
        assert_eq!(Permission::from_rwx_string("drwxr-x---").mode(), 0o750);
        assert_eq!(Permission::from_rwx_string("-rw-r--r--").mode(), 0o644);
        assert_eq!(Permission::from_rwx_string("rwsr-xr-t").mode(), 0o755);
        assert_eq!(Permission::from_rwx_string("-rw-r--r--.").mode(), 0o644);
    }

    #[test]
    fn garbage_is_empty() {
        assert_eq!(Permission::from_rwx_string("bogus"), Permission::EMPTY);
        assert_eq!(Permission::default(), Permission::EMPTY);
    }
}
