// src/plan.rs

//! Batched provisioning intents.
//!
//! A [`ProvisioningPlan`] collects install, uninstall, and update
//! intents and applies them to a layout in one transaction. Each
//! producer may appear in at most one intent; the conflict is reported
//! when the second intent is added, not when the plan runs.

use std::collections::BTreeMap;

use crate::config::PackConfig;
use crate::error::{Error, Result};
use crate::location::{PackId, Producer};
use crate::universe::PackUpdate;

#[derive(Debug, Clone, Default)]
pub struct ProvisioningPlan {
    installs: BTreeMap<Producer, PackConfig>,
    uninstalls: BTreeMap<Producer, PackId>,
    updates: BTreeMap<Producer, PackUpdate>,
}

impl ProvisioningPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a feature-pack install
    pub fn install(&mut self, config: PackConfig) -> Result<&mut Self> {
        let producer = config.producer().clone();
        self.ensure_free(&producer, "install")?;
        self.installs.insert(producer, config);
        Ok(self)
    }

    /// Queue removal of an installed build
    pub fn uninstall(&mut self, id: PackId) -> Result<&mut Self> {
        self.ensure_free(&id.producer, "uninstall")?;
        self.uninstalls.insert(id.producer.clone(), id);
        Ok(self)
    }

    /// Queue an update produced by the universe
    pub fn update(&mut self, update: PackUpdate) -> Result<&mut Self> {
        self.ensure_free(&update.producer, "update")?;
        self.updates.insert(update.producer.clone(), update);
        Ok(self)
    }

    fn ensure_free(&self, producer: &Producer, intent: &str) -> Result<()> {
        match self.intent_for(producer) {
            Some(existing) => Err(Error::PlanConflict(format!(
                "cannot add {} intent for {}: an {} intent already exists",
                intent, producer, existing
            ))),
            None => Ok(()),
        }
    }

    /// The intent already queued for a producer, if any
    pub fn intent_for(&self, producer: &Producer) -> Option<&'static str> {
        if self.installs.contains_key(producer) {
            Some("install")
        } else if self.uninstalls.contains_key(producer) {
            Some("uninstall")
        } else if self.updates.contains_key(producer) {
            Some("update")
        } else {
            None
        }
    }

    /// Install intents in producer order
    pub fn installs(&self) -> impl Iterator<Item = &PackConfig> {
        self.installs.values()
    }

    /// Uninstall intents in producer order
    pub fn uninstalls(&self) -> impl Iterator<Item = &PackId> {
        self.uninstalls.values()
    }

    /// Update intents in producer order
    pub fn updates(&self) -> impl Iterator<Item = &PackUpdate> {
        self.updates.values()
    }

    pub fn is_empty(&self) -> bool {
        self.installs.is_empty() && self.uninstalls.is_empty() && self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.installs.len() + self.uninstalls.len() + self.updates.len()
    }
}
