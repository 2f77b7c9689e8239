use model::core::identifiers::{PhaseId, UnitId};
use serde::Serialize;

/// Projected work for one phase of one unit.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PhaseEstimate {
    pub phase: PhaseId,
    pub chunks: usize,
    pub skipped_chunks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UnitEstimate {
    pub unit_id: UnitId,
    pub phases: Vec<PhaseEstimate>,
    /// Phases the store already has done; they cost nothing.
    pub already_done: Vec<PhaseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreadable: Option<String>,
}

impl UnitEstimate {
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            phases: Vec::new(),
            already_done: Vec::new(),
            unreadable: None,
        }
    }

    pub fn cost_usd(&self) -> f64 {
        self.phases.iter().map(|p| p.cost_usd).sum()
    }
}

/// What a run would send and roughly what it would cost, without calling
/// anything.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub model: String,
    pub units: Vec<UnitEstimate>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl CostEstimate {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            units: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost_usd: 0.0,
        }
    }

    pub fn push(&mut self, unit: UnitEstimate) {
        for phase in &unit.phases {
            self.input_tokens += phase.input_tokens;
            self.output_tokens += phase.output_tokens;
        }
        self.estimated_cost_usd += unit.cost_usd();
        self.units.push(unit);
    }
}
