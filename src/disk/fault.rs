//! Fault injection for [`super::Disk`] implementations

use super::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Always,
    Never,
}

/// A fault makes a disk return `kind` on every call while `when` is [`When::Always`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fault {
    pub when: When,
    pub kind: FailureKind,
}

impl Fault {
    pub fn always(kind: FailureKind) -> Self {
        Self {
            when: When::Always,
            kind,
        }
    }

    pub fn is_active(&self) -> bool {
        self.when == When::Always
    }
}

impl Default for Fault {
    fn default() -> Self {
        Self {
            when: When::Never,
            kind: FailureKind::FaultyDisk,
        }
    }
}
