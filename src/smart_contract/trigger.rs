//! Why an execution is running.

/// Trigger of an execution, exposed to scripts by `System.Runtime.GetTrigger`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TriggerType {
    /// Before a block's transactions are processed.
    OnPersist = 0x01,
    /// After a block's transactions were processed.
    PostPersist = 0x02,
    /// Witness checking. Scripts run read-only.
    Verification = 0x20,
    /// Transaction script execution.
    Application = 0x40,
}

impl TriggerType {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerType::OnPersist => "OnPersist",
            TriggerType::PostPersist => "PostPersist",
            TriggerType::Verification => "Verification",
            TriggerType::Application => "Application",
        }
    }
}
