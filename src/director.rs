use crate::{Scheduler, SchedulerStats};

use std::collections::BTreeMap;
use std::time::Instant;
use tilestream_map::Camera;

/// Owns the schedulers of an application, one per tile layer, and fans events out to all of them.
#[derive(Default)]
pub struct SchedulerDirector {
    schedulers: BTreeMap<String, Scheduler>,
}

impl SchedulerDirector {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// If a scheduler with the same name is already registered.
    pub fn register(&mut self, scheduler: Scheduler) {
        let name = scheduler.name().to_owned();
        assert!(
            !self.schedulers.contains_key(&name),
            "A scheduler named {:?} is already registered",
            name
        );
        log::info!("Registered tile scheduler {:?}", name);
        self.schedulers.insert(name, scheduler);
    }

    pub fn get(&self, name: &str) -> Option<&Scheduler> {
        self.schedulers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Scheduler> {
        self.schedulers.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Scheduler> {
        self.schedulers.remove(name)
    }

    /// Sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schedulers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    pub fn update_camera_all(&mut self, camera: &Camera) {
        for scheduler in self.schedulers.values_mut() {
            scheduler.update_camera(camera.clone());
        }
    }

    /// Returns the total number of fetch results applied.
    pub fn pump_all(&mut self) -> usize {
        self.pump_all_at(Instant::now())
    }

    pub fn pump_all_at(&mut self, now: Instant) -> usize {
        self.schedulers
            .values_mut()
            .map(|scheduler| scheduler.pump_at(now))
            .sum()
    }

    /// Persists every scheduler now, e.g. before shutdown.
    pub fn persist_all(&mut self) {
        for scheduler in self.schedulers.values_mut() {
            scheduler.on_persist_timeout();
        }
    }

    pub fn on_connectivity_restored_all(&mut self) {
        for scheduler in self.schedulers.values_mut() {
            scheduler.on_connectivity_restored();
        }
    }

    pub fn stats(&self) -> Vec<(String, SchedulerStats)> {
        self.schedulers
            .iter()
            .map(|(name, scheduler)| (name.clone(), scheduler.stats()))
            .collect()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
