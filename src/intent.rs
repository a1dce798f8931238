//! Intent categories and the classification result contract.
//!
//! The classifier returns a JSON array of exactly five booleans with a
//! fixed index meaning: `[send_info, create_account, unknown,
//! speak_to_human, reserved]`. Exactly one flag is true and the reserved
//! slot is always false. Anything else is invalid and gets coerced to
//! `unknown` by the gateway.

use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;

/// Number of intent slots in the classifier wire format.
pub const INTENT_SLOTS: usize = 5;

/// Closed set of email intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SendInfo,
    CreateAccount,
    Unknown,
    SpeakToHuman,
    /// Reserved slot — never produced by a valid classification.
    Reserved,
}

impl Intent {
    /// All intents in wire order.
    pub const ALL: [Intent; INTENT_SLOTS] = [
        Intent::SendInfo,
        Intent::CreateAccount,
        Intent::Unknown,
        Intent::SpeakToHuman,
        Intent::Reserved,
    ];

    /// Intents the router must have a handler for.
    pub const ROUTABLE: [Intent; 4] = [
        Intent::SendInfo,
        Intent::CreateAccount,
        Intent::Unknown,
        Intent::SpeakToHuman,
    ];

    /// Stable label used in logs and the database.
    pub fn label(&self) -> &'static str {
        match self {
            Intent::SendInfo => "send_info",
            Intent::CreateAccount => "create_account",
            Intent::Unknown => "unknown",
            Intent::SpeakToHuman => "speak_to_human",
            Intent::Reserved => "reserved",
        }
    }

    /// Parse a label back into an intent (for rows read from the database).
    pub fn from_label(label: &str) -> Option<Intent> {
        Intent::ALL.iter().copied().find(|i| i.label() == label)
    }

    fn from_index(index: usize) -> Option<Intent> {
        Intent::ALL.get(index).copied()
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Validated result of one classification call. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub flags: [bool; INTENT_SLOTS],
    /// Raw classifier output, kept for debugging and the persisted record.
    pub raw_response: String,
}

impl ClassificationResult {
    /// Build a result from a validated flags vector.
    ///
    /// Enforces the contract: exactly five booleans, exactly one true,
    /// reserved slot false.
    pub fn from_flags(flags: &[bool], raw_response: &str) -> Result<Self, ClassifyError> {
        if flags.len() != INTENT_SLOTS {
            return Err(ClassifyError::WrongLength(flags.len()));
        }
        let true_count = flags.iter().filter(|f| **f).count();
        if true_count != 1 {
            return Err(ClassifyError::WrongTrueCount(true_count));
        }
        if flags[INTENT_SLOTS - 1] {
            return Err(ClassifyError::ReservedSet);
        }

        let index = flags.iter().position(|f| *f).expect("one flag is true");
        let intent = Intent::from_index(index).expect("index < INTENT_SLOTS");

        let mut arr = [false; INTENT_SLOTS];
        arr.copy_from_slice(flags);
        Ok(Self {
            intent,
            flags: arr,
            raw_response: raw_response.to_string(),
        })
    }

    /// Parse a raw classifier response (a JSON array of five booleans).
    pub fn from_raw(raw: &str) -> Result<Self, ClassifyError> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;

        let items = value
            .as_array()
            .ok_or_else(|| ClassifyError::MalformedResponse("not a JSON array".to_string()))?;

        if items.len() != INTENT_SLOTS {
            return Err(ClassifyError::WrongLength(items.len()));
        }

        let mut flags = [false; INTENT_SLOTS];
        for (i, item) in items.iter().enumerate() {
            flags[i] = item.as_bool().ok_or(ClassifyError::NonBoolean(i))?;
        }

        Self::from_flags(&flags, raw)
    }

    /// The coercion target for any invalid or failed classification.
    pub fn unknown(raw_response: &str) -> Self {
        Self {
            intent: Intent::Unknown,
            flags: [false, false, true, false, false],
            raw_response: raw_response.to_string(),
        }
    }

    /// Flags vector as JSON, for the persisted record.
    pub fn flags_json(&self) -> String {
        serde_json::to_string(&self.flags.to_vec()).expect("bool vec serializes")
    }
}
