//! Conversation dataset records (ShareGPT-style JSON arrays).

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

pub const HUMAN: &str = "human";
pub const GPT: &str = "gpt";
pub const SYSTEM: &str = "system";

/// Speakers whose presence disqualifies a whole conversation.
pub const DISALLOWED_SPEAKERS: [&str; 3] = ["bing", "bard", "chatgpt"];

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One turn, kept as its raw JSON object so unknown keys, key order and
/// explicit nulls are written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Turn {
    fields: JsonMap<String, Value>,
}

impl Turn {
    pub fn new(from: &str, value: &str) -> Self {
        let mut fields = JsonMap::new();
        fields.insert("from".to_string(), Value::from(from));
        fields.insert("value".to_string(), Value::from(value));
        Self { fields }
    }

    pub fn with_tokens(mut self, n: i64) -> Self {
        self.fields.insert("num_tokens".to_string(), Value::from(n));
        self
    }

    /// Speaker label; empty when absent or not a string.
    pub fn speaker(&self) -> &str {
        self.fields.get("from").and_then(Value::as_str).unwrap_or("")
    }

    /// Text of the turn; empty when absent or not a string.
    pub fn text(&self) -> &str {
        self.fields.get("value").and_then(Value::as_str).unwrap_or("")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Presence of the key is what counts, whatever its value.
    pub fn has_num_tokens(&self) -> bool {
        self.fields.contains_key("num_tokens")
    }

    /// Recorded count when it is an integer.
    pub fn recorded_tokens(&self) -> Option<i64> {
        self.fields.get("num_tokens").and_then(Value::as_i64)
    }

    /// Absent, null or whitespace-only `value`.
    pub fn is_empty(&self) -> bool {
        match self.fields.get("value") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }

    pub fn is_system(&self) -> bool {
        self.speaker() == SYSTEM
    }

    pub fn is_disallowed(&self) -> bool {
        DISALLOWED_SPEAKERS.contains(&self.speaker())
    }

    pub fn lacks_token_count(&self) -> bool {
        self.speaker() == GPT && !self.has_num_tokens()
    }

    /// Only human and gpt turns take part in consecutive-speaker checks.
    pub fn collapsible(&self) -> bool {
        matches!(self.speaker(), HUMAN | GPT)
    }
}

// `Some(Value::Null)` for a key present as null, `None` for a missing key.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<Turn>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub num_round: Option<Value>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

impl Conversation {
    pub fn new(id: &str, turns: Vec<Turn>) -> Self {
        Self {
            id: Some(Value::String(id.to_string())),
            conversations: Some(turns),
            num_round: None,
            extra: JsonMap::new(),
        }
    }

    /// Id used in reports; `unknown` when absent or null.
    pub fn id_label(&self) -> String {
        match &self.id {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => "unknown".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

pub fn read_conversations(path: &Path) -> Result<Vec<Conversation>, ConversationError> {
    let file = File::open(path).map_err(|source| ConversationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ConversationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Pretty-printed array; non-ASCII text is written as-is.
pub fn write_conversations(path: &Path, data: &[Conversation]) -> Result<(), ConversationError> {
    let io_err = |source| ConversationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data).map_err(|source| ConversationError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)
}

/// `<stem>_fixed.json` next to the input file.
pub fn default_fixed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("conversations");
    input.with_file_name(format!("{stem}_fixed.json"))
}
