//! The human (or script) driving the hierarchy.

use std::collections::{HashMap, VecDeque};

use crate::error::{PkiError, Result};
use crate::policy::CaRole;
use crate::vault::Passphrase;

/// Why a passphrase is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassphraseStage {
    /// First entry for a new CA key.
    Enter,
    /// Second entry, compared against the first.
    Confirm,
    /// Unlocking an existing CA key.
    Unlock,
}

/// Destructive steps that need an explicit yes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// An issued bundle with this artifact name already exists.
    OverwriteBundle { artifact: String },
    /// Tear down the existing hierarchy before setting up a new one.
    DestroyHierarchy,
}

pub trait Operator {
    fn passphrase(&mut self, ca: CaRole, stage: PassphraseStage) -> Result<Passphrase>;

    fn confirm(&mut self, confirmation: &Confirmation) -> bool;
}

/// Non-interactive operator answering from preset values.
///
/// Every prompt for a CA returns that CA's passphrase, except that
/// [`ScriptedOperator::mismatch`] makes the confirmation differ.
/// Confirmations are answered from a queue, then from the default answer.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    passphrases: HashMap<CaRole, Passphrase>,
    mismatched: Vec<CaRole>,
    answers: VecDeque<bool>,
    default_answer: bool,
    prompts: Vec<(CaRole, PassphraseStage)>,
    confirmations: Vec<Confirmation>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `secret` for every CA that has no passphrase of its own.
    pub fn with_all(mut self, secret: &str) -> Self {
        for ca in CaRole::ALL {
            self.passphrases
                .entry(ca)
                .or_insert_with(|| Passphrase::new(secret));
        }
        self
    }

    pub fn with_passphrase(mut self, ca: CaRole, secret: &str) -> Self {
        self.passphrases.insert(ca, Passphrase::new(secret));
        self
    }

    pub fn mismatch(mut self, ca: CaRole) -> Self {
        self.mismatched.push(ca);
        self
    }

    pub fn answer(mut self, yes: bool) -> Self {
        self.answers.push_back(yes);
        self
    }

    pub fn always(mut self, yes: bool) -> Self {
        self.default_answer = yes;
        self
    }

    /// Passphrase prompts seen so far.
    pub fn prompts(&self) -> &[(CaRole, PassphraseStage)] {
        &self.prompts
    }

    pub fn confirmations(&self) -> &[Confirmation] {
        &self.confirmations
    }
}

impl Operator for ScriptedOperator {
    fn passphrase(&mut self, ca: CaRole, stage: PassphraseStage) -> Result<Passphrase> {
        self.prompts.push((ca, stage));
        let secret = self
            .passphrases
            .get(&ca)
            .cloned()
            .ok_or(PkiError::EmptyPassphrase)?;
        if stage == PassphraseStage::Confirm && self.mismatched.contains(&ca) {
            return Ok(Passphrase::new(format!("{}-typo", secret.expose())));
        }
        Ok(secret)
    }

    fn confirm(&mut self, confirmation: &Confirmation) -> bool {
        self.confirmations.push(confirmation.clone());
        self.answers.pop_front().unwrap_or(self.default_answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_then_default() {
        let mut operator = ScriptedOperator::new().answer(true).always(false);
        assert!(operator.confirm(&Confirmation::DestroyHierarchy));
        assert!(!operator.confirm(&Confirmation::DestroyHierarchy));
        assert_eq!(operator.confirmations().len(), 2);
    }

    #[test]
    fn test_mismatch_only_affects_confirmation() {
        let mut operator = ScriptedOperator::new()
            .with_all("secret")
            .mismatch(CaRole::People);
        let first = operator
            .passphrase(CaRole::People, PassphraseStage::Enter)
            .unwrap();
        let second = operator
            .passphrase(CaRole::People, PassphraseStage::Confirm)
            .unwrap();
        assert!(!first.matches(&second));
        let root = operator
            .passphrase(CaRole::Root, PassphraseStage::Confirm)
            .unwrap();
        assert_eq!(root.expose(), "secret");
    }

    #[test]
    fn test_missing_passphrase_is_an_error() {
        let mut operator = ScriptedOperator::new();
        assert!(matches!(
            operator.passphrase(CaRole::Root, PassphraseStage::Unlock),
            Err(PkiError::EmptyPassphrase)
        ));
    }
}
