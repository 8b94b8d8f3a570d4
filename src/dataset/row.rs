//! Dataset row shape written to the durable store.

use crate::telemetry::{Interaction, ToolCallRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One evaluation test case derived from a successful interaction.
///
/// The agent's answer is stored as `reference`. Rows start with
/// `reviewed: false`; a human flips it after checking the reference, and only
/// reviewed rows should be trusted as ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub interaction_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub instruction: String,
    pub reference: String,
    pub context: Option<String>,
    pub reviewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<ToolCallRecord>>,
}

impl DatasetRow {
    /// Build a row from a finished interaction; failed interactions yield `None`
    pub fn from_interaction(
        agent_name: &str,
        interaction: &Interaction,
        include_trajectory: bool,
    ) -> Option<Self> {
        if interaction.is_error() {
            return None;
        }

        Some(Self {
            interaction_id: interaction.interaction_id.clone(),
            agent_name: agent_name.to_string(),
            timestamp: interaction.ended_at,
            instruction: interaction.input_text(),
            reference: interaction.output.clone().unwrap_or_default(),
            context: None,
            reviewed: false,
            metadata: (!interaction.metadata.is_empty()).then(|| interaction.metadata.clone()),
            trajectory: (include_trajectory && !interaction.trajectory.is_empty())
                .then(|| interaction.trajectory.clone()),
        })
    }
}
