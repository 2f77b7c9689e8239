use engine_config::report::finding::{CODE_MISSING_KEY, CODE_WRONG_TYPE, Finding, FindingKind};
use model::schema::{
    canonical::CanonicalRecord,
    contract::{JsonKind, StageContract},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    MissingKey {
        key: String,
        blocking: bool,
    },
    WrongType {
        key: String,
        expected: JsonKind,
        found: &'static str,
        blocking: bool,
    },
}

impl Violation {
    pub fn is_blocking(&self) -> bool {
        match self {
            Violation::MissingKey { blocking, .. } | Violation::WrongType { blocking, .. } => {
                *blocking
            }
        }
    }

    pub fn to_finding(&self, phase: &str) -> Finding {
        let finding = |code: &str, message: String| {
            if self.is_blocking() {
                Finding::error(code, &message, FindingKind::Contract)
            } else {
                Finding::warning(code, &message, FindingKind::Contract)
            }
        };
        match self {
            Violation::MissingKey { key, .. } => finding(
                CODE_MISSING_KEY,
                format!("Phase `{phase}` record is missing required key `{key}`."),
            ),
            Violation::WrongType {
                key,
                expected,
                found,
                ..
            } => finding(
                CODE_WRONG_TYPE,
                format!("Phase `{phase}` record key `{key}` should be {expected}, found {found}."),
            ),
        }
    }
}

/// Every violation of a contract by one record; empty when the record passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractCheck {
    pub violations: Vec<Violation>,
}

impl ContractCheck {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn is_blocked(&self) -> bool {
        self.violations.iter().any(Violation::is_blocking)
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_blocking())
    }

    pub fn advisory(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| !v.is_blocking())
    }
}

/// Checks a record's payload against a contract. Collects rather than
/// stopping at the first problem.
pub fn validate(contract: &StageContract, record: &CanonicalRecord) -> ContractCheck {
    let violations = contract
        .required
        .iter()
        .filter_map(|required| match record.get(&required.key) {
            None => Some(Violation::MissingKey {
                key: required.key.clone(),
                blocking: required.blocking,
            }),
            Some(value) if !required.kind.matches(value) => Some(Violation::WrongType {
                key: required.key.clone(),
                expected: required.kind,
                found: JsonKind::of(value),
                blocking: required.blocking,
            }),
            Some(_) => None,
        })
        .collect();
    ContractCheck { violations }
}
