//! Topic addressing
//!
//! A topic is a `(type, id)` pair naming one broadcast channel: a single
//! workflow run, a chat, or a user's personal feed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;

/// Kind of broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicType {
    /// Events of one workflow run
    Workflow,
    /// Events of one chat conversation
    Chat,
    /// Events addressed to one user
    User,
}

impl TopicType {
    /// Get the wire name of the topic type
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicType::Workflow => "workflow",
            TopicType::Chat => "chat",
            TopicType::User => "user",
        }
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workflow" => Ok(TopicType::Workflow),
            "chat" => Ok(TopicType::Chat),
            "user" => Ok(TopicType::User),
            other => Err(RegistryError::InvalidTopicType(other.to_string())),
        }
    }
}

/// A broadcast channel identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic {
    pub topic_type: TopicType,
    pub topic_id: String,
}

impl Topic {
    pub fn new(topic_type: TopicType, topic_id: impl Into<String>) -> Self {
        Self {
            topic_type,
            topic_id: topic_id.into(),
        }
    }

    /// Topic carrying the events of one workflow run
    pub fn workflow(run_id: impl Into<String>) -> Self {
        Self::new(TopicType::Workflow, run_id)
    }

    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self::new(TopicType::Chat, chat_id)
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(TopicType::User, user_id)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic_type, self.topic_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_type_parsing() {
        assert_eq!("workflow".parse::<TopicType>().unwrap(), TopicType::Workflow);
        assert_eq!(" Chat ".parse::<TopicType>().unwrap(), TopicType::Chat);
        assert_eq!("USER".parse::<TopicType>().unwrap(), TopicType::User);
        assert!("project".parse::<TopicType>().is_err());
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(Topic::workflow("wf-1").to_string(), "workflow:wf-1");
        assert_eq!(Topic::user("alice").to_string(), "user:alice");
    }

    #[test]
    fn test_topic_serialization() {
        let json = serde_json::to_string(&Topic::chat("c-9")).unwrap();
        assert!(json.contains("\"topic_type\":\"chat\""));
        assert!(json.contains("\"topic_id\":\"c-9\""));
    }
}
