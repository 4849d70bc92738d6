//! Weighted prompts
//!
//! A prompt is a text label steering generation with a weight in `[0, 2]`.
//! Only prompts with a positive weight whose text the backend has not
//! filtered are sent anywhere.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound of the weight domain
pub const MAX_WEIGHT: f32 = 2.0;

fn clamp_weight(weight: f32) -> f32 {
    if weight.is_finite() {
        weight.clamp(0.0, MAX_WEIGHT)
    } else {
        0.0
    }
}

/// A single weighted prompt
///
/// Identity is `id`; `text` and `color` are display metadata and
/// `control_id` names the hardware control bound to it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub text: String,
    pub weight: f32,
    #[serde(default)]
    pub control_id: Option<String>,
    #[serde(default)]
    pub color: String,
}

impl Prompt {
    pub fn new(text: impl Into<String>, weight: f32) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text, weight)
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>, weight: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            weight: clamp_weight(weight),
            control_id: None,
            color: String::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_control(mut self, control_id: impl Into<String>) -> Self {
        self.control_id = Some(control_id.into());
        self
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = clamp_weight(weight);
    }
}

/// What a session receives: text and weight of one active prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePrompt {
    pub text: String,
    pub weight: f32,
}

/// Prompts keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightedPromptSet {
    prompts: HashMap<String, Prompt>,
}

impl WeightedPromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id; the weight is clamped into `[0, 2]`
    pub fn insert(&mut self, mut prompt: Prompt) -> Option<Prompt> {
        prompt.weight = clamp_weight(prompt.weight);
        self.prompts.insert(prompt.id.clone(), prompt)
    }

    pub fn remove(&mut self, id: &str) -> Option<Prompt> {
        self.prompts.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Prompt> {
        self.prompts.get(id)
    }

    /// Returns false if no prompt has this id
    pub fn set_weight(&mut self, id: &str, weight: f32) -> bool {
        match self.prompts.get_mut(id) {
            Some(prompt) => {
                prompt.set_weight(weight);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.values()
    }

    /// Prompts with `weight > 0` whose text is not in `filtered`
    ///
    /// Sorted by text so deliveries are stable.
    pub fn active(&self, filtered: &HashSet<String>) -> Vec<ActivePrompt> {
        let mut active: Vec<ActivePrompt> = self
            .prompts
            .values()
            .filter(|p| p.weight > 0.0 && !filtered.contains(&p.text))
            .map(|p| ActivePrompt {
                text: p.text.clone(),
                weight: p.weight,
            })
            .collect();
        active.sort_by(|a, b| a.text.cmp(&b.text));
        active
    }
}

impl FromIterator<Prompt> for WeightedPromptSet {
    fn from_iter<I: IntoIterator<Item = Prompt>>(iter: I) -> Self {
        let mut set = Self::new();
        for prompt in iter {
            set.insert(prompt);
        }
        set
    }
}
