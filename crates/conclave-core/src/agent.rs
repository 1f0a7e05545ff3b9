use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
    Max,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

/// Which registered tools (or agents) an agent may use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Everything registered.
    #[default]
    All,
    /// Everything registered minus these.
    AllExcept(BTreeSet<String>),
    /// Only these.
    Only(BTreeSet<String>),
    /// Nothing.
    None,
}

impl Access {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn all_except<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllExcept(names.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::AllExcept(excluded) => !excluded.contains(name),
            Self::Only(included) => included.contains(name),
            Self::None => false,
        }
    }

    /// Names mentioned explicitly, for roster validation.
    pub fn named(&self) -> impl Iterator<Item = &str> {
        let set = match self {
            Self::AllExcept(s) | Self::Only(s) => Some(s),
            Self::All | Self::None => None,
        };
        set.into_iter().flatten().map(String::as_str)
    }
}

/// A model role: instructions, model choice, and what it may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub model: String,
    /// Name of a registered provider.
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_budget: Option<u32>,
    /// Vendor passthrough parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub tools: Access,
    #[serde(default)]
    pub delegates: Access,
}

fn default_temperature() -> f64 {
    1.0
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: model.into(),
            provider: provider.into(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            reasoning: false,
            reasoning_effort: ReasoningEffort::default(),
            reasoning_budget: None,
            extra: Map::new(),
            tools: Access::All,
            delegates: Access::All,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort, budget: Option<u32>) -> Self {
        self.reasoning = true;
        self.reasoning_effort = effort;
        self.reasoning_budget = budget;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_tools(mut self, tools: Access) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_delegates(mut self, delegates: Access) -> Self {
        self.delegates = delegates;
        self
    }
}
