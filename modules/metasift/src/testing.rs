// Test doubles for the pipeline.
//
// ScriptedOracle (Oracle) replays queued responses per stage and records every
// request it sees, so tests can assert on both outcomes and call counts.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::oracle::{Oracle, OracleRequest};

enum Scripted {
    Completions(Vec<String>),
    Error(String),
}

struct Rule {
    needle: Option<String>,
    response: Scripted,
}

/// Stage-routed fake oracle.
///
/// Responses queued for a stage are consumed in order. A response registered
/// with [`ScriptedOracle::on_matching`] is only served to requests whose query
/// contains the needle, which keeps concurrent table/section jobs deterministic.
/// A request with nothing queued fails with an error.
#[derive(Default)]
pub struct ScriptedOracle {
    rules: Mutex<HashMap<&'static str, VecDeque<Rule>>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, stage: &'static str, needle: Option<String>, response: Scripted) -> Self {
        self.rules
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(Rule { needle, response });
        self
    }

    /// Queue a single completion for `stage`.
    pub fn on(self, stage: &'static str, response: impl Into<String>) -> Self {
        self.push(stage, None, Scripted::Completions(vec![response.into()]))
    }

    /// Queue several sampled completions returned by one call.
    pub fn on_many(self, stage: &'static str, responses: Vec<String>) -> Self {
        self.push(stage, None, Scripted::Completions(responses))
    }

    /// Queue a completion served only to requests whose query contains `needle`.
    pub fn on_matching(
        self,
        stage: &'static str,
        needle: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.push(
            stage,
            Some(needle.into()),
            Scripted::Completions(vec![response.into()]),
        )
    }

    /// Queue a failure for `stage`.
    pub fn on_error(self, stage: &'static str, message: impl Into<String>) -> Self {
        self.push(stage, None, Scripted::Error(message.into()))
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, stage: &str) -> Vec<OracleRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.stage == stage)
            .collect()
    }

    pub fn call_count(&self, stage: &str) -> usize {
        self.requests_for(stage).len()
    }

    /// Responses still queued across all stages.
    pub fn remaining(&self) -> usize {
        self.rules.lock().unwrap().values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<Vec<String>> {
        self.requests.lock().unwrap().push(request.clone());

        let rule = {
            let mut rules = self.rules.lock().unwrap();
            let queue = rules.get_mut(request.stage);
            queue.and_then(|queue| {
                let pos = queue.iter().position(|rule| match &rule.needle {
                    Some(needle) => request.query.contains(needle.as_str()),
                    None => true,
                })?;
                queue.remove(pos)
            })
        };

        match rule.map(|r| r.response) {
            Some(Scripted::Completions(texts)) => Ok(texts),
            Some(Scripted::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response for stage {}", request.stage)),
        }
    }
}

/// A rubric response with every dimension set to `overall`.
pub fn verdict_json(overall: u8, suggestion: &str) -> String {
    serde_json::json!({
        "Data Accuracy": overall,
        "Semantic Consistency": overall,
        "Data Completeness": overall,
        "Overall Score": overall,
        "Suggestion": suggestion,
    })
    .to_string()
}
