mod residency;
mod timer;

pub use residency::*;
pub use timer::*;

use crate::fetch::{quad_channel, QuadSender, TileFetcher};

use crossbeam::channel::Receiver;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tilestream_core::work_timer::WorkTimer;
use tilestream_core::SmallKeyHashSet;
use tilestream_map::{
    desired_quads, leaf_tiles, should_refine, sort_nearest_first, unix_now, Camera, ConfigError,
    GpuArraySlotTable, HeightRangeTable, Quad, RefineParams, StreamingConfig, TileBoundingVolumes,
    TileCache, TileId,
};

/// Counters describing the work a [`Scheduler`] has done, plus the current size of its collections.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SchedulerStats {
    pub requests_sent: u64,
    pub quads_received: u64,
    pub network_errors: u64,
    pub quads_purged: u64,
    pub tiles_made_resident: u64,
    pub tiles_evicted_from_gpu: u64,
    pub persist_passes: u64,
    pub persist_failures: u64,
    pub ram_quads: usize,
    pub gpu_quads: usize,
    pub pending_requests: usize,
    pub failed_quads: usize,
}

/// # Tile Scheduler
///
/// Decides which quads to fetch, keep in memory, persist, and upload to the GPU for one named tile layer.
///
/// Each quad id moves through these states:
///
/// ```text
/// Unrequested -> Pending -> Cached -> GPU-resident
///                   |
///                   +-- network error --> Failed --(connectivity restored)--> Unrequested
/// ```
///
/// A quad that fails with a network error is never requested again on the scheduler's own initiative, however often the
/// update pass runs. [`Scheduler::on_connectivity_restored`] forgets every failure so the next pass requests them again.
///
/// ## Driving the Scheduler
///
/// The scheduler is single threaded and never blocks on the network. Fetch results travel from the [`TileFetcher`] through a
/// channel and are applied by [`Scheduler::pump`], which also fires the debounced update, purge, and persist timers. The
/// `on_*` methods are public so hosts with their own event loop can call them directly.
///
/// ## Caches
///
/// The RAM cache holds whole [`Quad`]s up to `ram_quad_quota`, with `ram_purge_hysteresis` slack before a purge kicks in. A
/// second cache of ids tracks which quads are GPU-resident, up to `gpu_quad_quota`. Both evict the quads that the refinement
/// walk stopped reaching the longest time ago.
pub struct Scheduler {
    name: String,
    config: StreamingConfig,
    refine_params: RefineParams,
    volumes: TileBoundingVolumes,
    camera: Option<Camera>,

    ram_cache: TileCache<Quad>,
    gpu: GpuResidency,
    pending: SmallKeyHashSet<TileId>,
    failed: SmallKeyHashSet<TileId>,

    fetcher: Box<dyn TileFetcher>,
    reply_tx: QuadSender,
    reply_rx: Receiver<Quad>,
    sink: Box<dyn ResidencySink>,
    is_ready_to_ship: Box<dyn Fn(&Quad) -> bool>,
    observers: Vec<Box<dyn FnMut(&Quad)>>,

    update_timer: DebounceTimer,
    purge_timer: DebounceTimer,
    persist_timer: DebounceTimer,

    cache_dir: Option<PathBuf>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(
        name: impl Into<String>,
        config: StreamingConfig,
        fetcher: impl TileFetcher + 'static,
        sink: impl ResidencySink + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (reply_tx, reply_rx) = quad_channel();

        Ok(Self {
            name: name.into(),
            config,
            refine_params: config.refine_params(),
            volumes: TileBoundingVolumes::default(),
            camera: None,
            ram_cache: TileCache::new(),
            gpu: GpuResidency::new(config.gpu_quad_quota, config.gpu_slot_capacity()),
            pending: Default::default(),
            failed: Default::default(),
            fetcher: Box::new(fetcher),
            reply_tx,
            reply_rx,
            sink: Box::new(sink),
            is_ready_to_ship: Box::new(|_| true),
            observers: Vec::new(),
            update_timer: DebounceTimer::new(config.update_debounce()),
            purge_timer: DebounceTimer::new(config.purge_debounce()),
            persist_timer: DebounceTimer::new(config.persist_debounce()),
            cache_dir: None,
            stats: SchedulerStats::default(),
        })
    }

    /// Only cached quads that pass `is_ready_to_ship` are made GPU-resident, e.g. once their images are decoded.
    pub fn with_readiness(mut self, is_ready_to_ship: impl Fn(&Quad) -> bool + 'static) -> Self {
        self.is_ready_to_ship = Box::new(is_ready_to_ship);
        self
    }

    pub fn with_height_table(mut self, heights: HeightRangeTable) -> Self {
        self.volumes = TileBoundingVolumes::new(heights);
        self
    }

    /// Persists the RAM cache in `dir`, first restoring whatever a previous run left there. A directory that can't be read
    /// is deleted.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match self.ram_cache.read_from_disk(&dir) {
            Ok(0) => {}
            Ok(n) => log::info!("{}: restored {} quads from {}", self.name, n, dir.display()),
            Err(e) => {
                log::warn!(
                    "{}: discarding unreadable tile cache at {}: {}",
                    self.name,
                    dir.display(),
                    e
                );
                delete_cache_dir(&self.name, &dir);
            }
        }
        self.cache_dir = Some(dir);
        self
    }

    /// `observer` sees every quad accepted into the RAM cache.
    pub fn add_observer(&mut self, observer: impl FnMut(&Quad) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn ram_cache(&self) -> &TileCache<Quad> {
        &self.ram_cache
    }

    pub fn gpu_cache(&self) -> &TileCache<GpuCacheInfo> {
        self.gpu.cache()
    }

    pub fn gpu_slots(&self) -> &GpuArraySlotTable {
        self.gpu.slots()
    }

    pub fn is_pending(&self, id: TileId) -> bool {
        self.pending.contains(&id)
    }

    /// The last fetch of `id` failed with a network error and it has not been retried since.
    pub fn is_failed(&self, id: TileId) -> bool {
        self.failed.contains(&id)
    }

    pub fn is_update_scheduled(&self) -> bool {
        self.update_timer.is_armed()
    }

    pub fn is_purge_scheduled(&self) -> bool {
        self.purge_timer.is_armed()
    }

    pub fn is_persist_scheduled(&self) -> bool {
        self.persist_timer.is_armed()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ram_quads: self.ram_cache.len(),
            gpu_quads: self.gpu.cache().len(),
            pending_requests: self.pending.len(),
            failed_quads: self.failed.len(),
            ..self.stats.clone()
        }
    }

    pub fn update_camera(&mut self, camera: Camera) {
        self.update_camera_at(camera, Instant::now());
    }

    pub fn update_camera_at(&mut self, camera: Camera, now: Instant) {
        self.camera = Some(camera);
        self.update_timer.arm(now);
    }

    /// Re-runs the update pass soon, so quads dropped after network errors are requested again.
    pub fn on_connectivity_restored(&mut self) {
        if !self.failed.is_empty() {
            log::info!("{}: retrying {} failed quads", self.name, self.failed.len());
        }
        self.failed.clear();
        self.update_timer.arm(Instant::now());
    }

    /// Applies every fetch result that has arrived and runs the passes whose timers are due.
    ///
    /// Returns the number of fetch results applied.
    pub fn pump(&mut self) -> usize {
        self.pump_at(Instant::now())
    }

    pub fn pump_at(&mut self, now: Instant) -> usize {
        let mut num_received = 0;
        while let Ok(quad) = self.reply_rx.try_recv() {
            self.receive_quad(quad, now);
            num_received += 1;
        }

        if self.update_timer.fire_if_due(now) {
            self.on_update_timeout();
        }
        if self.purge_timer.fire_if_due(now) {
            self.on_purge_timeout();
        }
        if self.persist_timer.fire_if_due(now) {
            self.on_persist_timeout();
        }

        num_received
    }

    /// The tiles that would be drawn from the current camera.
    pub fn leaf_tiles(&self) -> Vec<TileId> {
        match &self.camera {
            Some(camera) => leaf_tiles(camera, &self.volumes, &self.refine_params),
            None => Vec::new(),
        }
    }

    /// Quads the current camera needs that are not cached, or were cached longer ago than the retirement age. Nearest first.
    ///
    /// Quads whose last fetch failed are left out until [`Scheduler::on_connectivity_restored`].
    pub fn missing_quads_for_current_camera(&self) -> Vec<TileId> {
        let camera = match &self.camera {
            Some(camera) => camera,
            None => return Vec::new(),
        };

        let now = unix_now();
        let mut missing: Vec<TileId> = desired_quads(camera, &self.volumes, &self.refine_params)
            .into_iter()
            .filter(|&id| !self.failed.contains(&id) && !self.is_fresh(id, now))
            .collect();
        sort_nearest_first(&mut missing, camera, &self.volumes);
        missing
    }

    fn is_fresh(&self, id: TileId, now: u64) -> bool {
        self.ram_cache
            .get(id)
            .map_or(false, |quad| quad.age_secs(now) < self.config.retirement_age_secs)
    }

    /// Requests the quads the camera needs and recomputes GPU residency.
    pub fn on_update_timeout(&mut self) {
        let camera = match &self.camera {
            Some(camera) => camera.clone(),
            None => return,
        };

        self.ram_cache.advance_time();

        for id in self.missing_quads_for_current_camera() {
            if self.pending.insert(id) {
                log::debug!("{}: requesting quad {}", self.name, id);
                self.fetcher.request(id, self.reply_tx.clone());
                self.stats.requests_sent += 1;
            }
        }

        self.update_gpu_residency(&camera);
    }

    fn update_gpu_residency(&mut self, camera: &Camera) {
        let volumes = &self.volumes;
        let params = &self.refine_params;
        let is_ready_to_ship = &self.is_ready_to_ship;

        let mut wanted = Vec::new();
        self.ram_cache.visit(|quad| {
            let ship = should_refine(quad.id, camera, volumes, params) && is_ready_to_ship(quad);
            if ship {
                wanted.push(quad.id);
            }
            ship
        });

        let change = self.gpu.update(&wanted, &self.ram_cache, &mut *self.sink);
        self.stats.tiles_made_resident += change.added as u64;
        self.stats.tiles_evicted_from_gpu += change.removed as u64;
    }

    /// Applies one fetch result as if it had just arrived through the queue.
    pub fn on_quad_received(&mut self, quad: Quad) {
        self.receive_quad(quad, Instant::now());
    }

    fn receive_quad(&mut self, quad: Quad, now: Instant) {
        let id = quad.id;
        self.pending.remove(&id);

        if !quad.is_usable() {
            log::warn!("{}: dropping quad {} after a network error", self.name, id);
            self.stats.network_errors += 1;
            self.failed.insert(id);
            return;
        }
        self.failed.remove(&id);

        log::debug!("{}: received quad {} ({:?})", self.name, id, quad.status());
        self.stats.quads_received += 1;
        self.ram_cache.insert(quad);

        self.purge_timer.arm(now);
        self.persist_timer.arm(now);
        self.update_timer.arm(now);

        let quad = self.ram_cache.peek(id);
        for observer in self.observers.iter_mut() {
            observer(quad);
        }
    }

    /// Shrinks the RAM cache back to its quota once it has grown past the hysteresis margin.
    pub fn on_purge_timeout(&mut self) {
        let limit = self.config.ram_quad_quota + self.config.ram_purge_hysteresis;
        if self.ram_cache.len() <= limit {
            return;
        }

        // Refresh everything the camera still wants so the purge takes the rest.
        if let Some(camera) = &self.camera {
            let volumes = &self.volumes;
            let params = &self.refine_params;
            self.ram_cache
                .visit(|quad| should_refine(quad.id, camera, volumes, params));
        }

        let evicted = self.ram_cache.purge(self.config.ram_quad_quota);
        log::debug!("{}: purged {} quads", self.name, evicted.len());
        self.stats.quads_purged += evicted.len() as u64;
    }

    /// Writes the RAM cache to the cache directory, if there is one. If the write fails, the directory is deleted.
    pub fn on_persist_timeout(&mut self) {
        let dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => return,
        };

        let mut timer = WorkTimer::start(self.config.persist_budget());
        match self.ram_cache.write_to_disk(&dir) {
            Ok(num_written) => {
                timer.complete_items(num_written as u32);
                self.stats.persist_passes += 1;
            }
            Err(e) => {
                log::error!(
                    "{}: failed to persist tile cache to {}: {}",
                    self.name,
                    dir.display(),
                    e
                );
                self.stats.persist_failures += 1;
                delete_cache_dir(&self.name, &dir);
            }
        }

        if let Some(elapsed) = timer.over_budget() {
            log::warn!(
                "{}: persisting {} quads took {:?}, over the budget of {:?} ({} us per quad)",
                self.name,
                timer.items_completed(),
                elapsed,
                timer.budget(),
                timer.average_item_time_us()
            );
        }
    }
}

fn delete_cache_dir(name: &str, dir: &Path) {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            log::error!(
                "{}: failed to delete tile cache at {}: {}",
                name,
                dir.display(),
                e
            );
        }
        _ => {}
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::{InlineFetcher, TileSource};

    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;
    use std::f64::consts::FRAC_PI_3;
    use std::rc::Rc;
    use std::time::Duration;
    use tilestream_core::glam::DVec3;
    use tilestream_map::{tile_file_name, NetworkStatus, Projection};

    #[derive(Clone, Default)]
    struct RecordingFetcher {
        requests: Rc<RefCell<Vec<TileId>>>,
    }

    impl TileFetcher for RecordingFetcher {
        fn request(&mut self, id: TileId, _reply: QuadSender) {
            self.requests.borrow_mut().push(id);
        }
    }

    struct FreshSource;

    impl TileSource for FreshSource {
        fn fetch_quad(&self, id: TileId) -> Quad {
            Quad::uniform(id, NetworkStatus::Good, unix_now())
        }
    }

    type Deltas = Rc<RefCell<Vec<(Vec<TileId>, Vec<TileId>)>>>;

    fn recording_sink(deltas: &Deltas) -> impl ResidencySink {
        let deltas = deltas.clone();
        move |delta: &ResidencyDelta<'_>| {
            for tile in delta.added.iter() {
                assert_eq!(delta.dictionary.lookup(tile.id), Some(tile.slot));
            }
            for tile in delta.removed.iter() {
                assert_eq!(delta.dictionary.lookup(tile.id), None);
            }
            deltas.borrow_mut().push((
                delta.added.iter().map(|t| t.id).collect(),
                delta.removed.iter().map(|t| t.id).collect(),
            ));
        }
    }

    fn test_config() -> StreamingConfig {
        StreamingConfig {
            max_zoom_level: 2,
            ..Default::default()
        }
    }

    fn overhead_camera(altitude: f64) -> Camera {
        Camera::look_at(
            DVec3::new(0.0, 0.0, altitude),
            DVec3::ZERO,
            DVec3::Y,
            Projection {
                fov_y: FRAC_PI_3,
                aspect: 16.0 / 9.0,
                near: 1.0,
                far: 1e10,
                viewport_height: 1080.0,
            },
        )
    }

    fn near_view_quads() -> BTreeSet<TileId> {
        std::iter::once(TileId::ROOT)
            .chain(TileId::ROOT.children())
            .collect()
    }

    fn good_quad(id: TileId) -> Quad {
        Quad::uniform(id, NetworkStatus::Good, unix_now())
    }

    fn quad_at_zoom_3(x: u32) -> Quad {
        good_quad(TileId::new(3, x, 0))
    }

    #[test]
    fn network_errors_are_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(
            "imagery",
            test_config(),
            RecordingFetcher::default(),
            |_: &ResidencyDelta<'_>| {},
        )
        .unwrap()
        .with_cache_dir(dir.path().join("imagery"));
        let observed = Rc::new(Cell::new(0));
        let observed_clone = observed.clone();
        scheduler.add_observer(move |_| observed_clone.set(observed_clone.get() + 1));

        let failed = TileId::new(1, 0, 0);
        scheduler.on_quad_received(Quad::uniform(failed, NetworkStatus::NetworkError, unix_now()));

        assert!(!scheduler.ram_cache().contains(failed));
        assert!(!scheduler.is_persist_scheduled());
        assert!(!scheduler.is_purge_scheduled());
        assert_eq!(scheduler.stats().network_errors, 1);
        assert_eq!(observed.get(), 0);

        let missing = TileId::new(1, 1, 0);
        scheduler.on_quad_received(Quad::uniform(missing, NetworkStatus::NotFound, unix_now()));

        assert_eq!(
            scheduler.ram_cache().peek(missing).status(),
            NetworkStatus::NotFound
        );
        assert!(scheduler.is_persist_scheduled());
        assert!(scheduler.is_purge_scheduled());
        assert_eq!(observed.get(), 1);
    }

    #[test]
    fn failed_quads_wait_for_connectivity() {
        let fetcher = RecordingFetcher::default();
        let requests = fetcher.requests.clone();
        let mut scheduler =
            Scheduler::new("imagery", test_config(), fetcher, |_: &ResidencyDelta<'_>| {})
                .unwrap();
        let start = Instant::now();
        scheduler.update_camera_at(overhead_camera(1e6), start);
        scheduler.pump_at(start + Duration::from_secs(1));
        assert_eq!(requests.borrow().len(), 5);

        let child = TileId::ROOT.children()[0];
        scheduler.on_quad_received(Quad::uniform(
            TileId::ROOT,
            NetworkStatus::NetworkError,
            unix_now(),
        ));
        scheduler.on_quad_received(good_quad(child));
        assert!(scheduler.is_failed(TileId::ROOT));
        assert!(!scheduler.is_failed(child));
        assert_eq!(scheduler.stats().failed_quads, 1);

        // The good quad re-arms the update pass, which must not retry the failure.
        assert!(scheduler.is_update_scheduled());
        scheduler.pump_at(Instant::now() + Duration::from_secs(10));
        scheduler.on_update_timeout();
        assert_eq!(requests.borrow().len(), 5);
        assert!(!scheduler
            .missing_quads_for_current_camera()
            .contains(&TileId::ROOT));

        scheduler.on_connectivity_restored();
        assert!(!scheduler.is_failed(TileId::ROOT));
        scheduler.on_update_timeout();
        assert_eq!(requests.borrow().len(), 6);
        assert_eq!(requests.borrow()[5], TileId::ROOT);
        assert!(scheduler.is_pending(TileId::ROOT));
    }

    #[test]
    fn update_requests_missing_quads_once() {
        let fetcher = RecordingFetcher::default();
        let requests = fetcher.requests.clone();
        let mut scheduler =
            Scheduler::new("imagery", test_config(), fetcher, |_: &ResidencyDelta<'_>| {})
                .unwrap();

        scheduler.update_camera(overhead_camera(1e9));
        scheduler.on_update_timeout();
        assert!(requests.borrow().is_empty());

        scheduler.update_camera(overhead_camera(1e6));
        scheduler.on_update_timeout();
        let requested: BTreeSet<_> = requests.borrow().iter().copied().collect();
        assert_eq!(requested, near_view_quads());
        assert!(requested.iter().all(|&id| scheduler.is_pending(id)));

        // Pending quads are not requested again.
        scheduler.on_update_timeout();
        assert_eq!(requests.borrow().len(), 5);

        for &id in requested.iter() {
            scheduler.on_quad_received(good_quad(id));
        }
        assert_eq!(scheduler.stats().pending_requests, 0);
        assert!(scheduler.missing_quads_for_current_camera().is_empty());

        scheduler.on_update_timeout();
        assert_eq!(requests.borrow().len(), 5);
    }

    #[test]
    fn retired_quads_are_requested_again() {
        let fetcher = RecordingFetcher::default();
        let requests = fetcher.requests.clone();
        let mut scheduler =
            Scheduler::new("imagery", test_config(), fetcher, |_: &ResidencyDelta<'_>| {})
                .unwrap();

        let ancient = TileId::new(1, 1, 1);
        for id in near_view_quads() {
            let timestamp = if id == ancient { 0 } else { unix_now() };
            scheduler.on_quad_received(Quad::uniform(id, NetworkStatus::Good, timestamp));
        }

        scheduler.update_camera(overhead_camera(1e6));
        assert_eq!(scheduler.missing_quads_for_current_camera(), vec![ancient]);
        scheduler.on_update_timeout();
        assert_eq!(*requests.borrow(), vec![ancient]);
        // The stale copy stays usable until the new one arrives.
        assert!(scheduler.ram_cache().contains(ancient));
    }

    #[test]
    fn received_quads_become_gpu_resident() {
        let deltas = Deltas::default();
        let mut scheduler = Scheduler::new(
            "imagery",
            test_config(),
            RecordingFetcher::default(),
            recording_sink(&deltas),
        )
        .unwrap();
        scheduler.update_camera(overhead_camera(1e6));

        for id in near_view_quads() {
            scheduler.on_quad_received(good_quad(id));
        }
        scheduler.on_update_timeout();

        assert_eq!(deltas.borrow().len(), 1);
        let (added, removed) = deltas.borrow()[0].clone();
        assert_eq!(added.len(), 20);
        assert!(removed.is_empty());
        assert_eq!(scheduler.gpu_slots().len(), 20);
        assert_eq!(scheduler.stats().gpu_quads, 5);

        // A leaf at max zoom resolves to its own slot.
        let leaf = TileId::new(2, 1, 1);
        assert_eq!(scheduler.gpu_slots().layer_of(leaf).id, leaf);

        // Nothing changed, so the renderer hears nothing.
        scheduler.on_update_timeout();
        assert_eq!(deltas.borrow().len(), 1);
    }

    #[test]
    fn gpu_quota_overflow_within_one_pass_is_a_no_op() {
        let deltas = Deltas::default();
        let config = StreamingConfig {
            gpu_quad_quota: 2,
            ..test_config()
        };
        let mut scheduler = Scheduler::new(
            "imagery",
            config,
            RecordingFetcher::default(),
            recording_sink(&deltas),
        )
        .unwrap();
        scheduler.update_camera(overhead_camera(1e6));
        for id in near_view_quads() {
            scheduler.on_quad_received(good_quad(id));
        }

        scheduler.on_update_timeout();
        {
            let deltas = deltas.borrow();
            assert_eq!(deltas.len(), 1);
            let (added, removed) = &deltas[0];
            // The root quad and one of its children fit; the rest were added and evicted in the same pass.
            assert_eq!(added.len(), 8);
            assert!(removed.is_empty());
        }
        assert_eq!(scheduler.gpu_cache().len(), 2);
        assert!(scheduler.gpu_cache().contains(TileId::ROOT));
        assert_eq!(scheduler.gpu_slots().len(), 8);

        scheduler.on_update_timeout();
        assert_eq!(deltas.borrow().len(), 1);
        assert_eq!(scheduler.gpu_slots().len(), 8);
    }

    #[test]
    fn quads_that_stop_being_wanted_give_up_their_slots() {
        let deltas = Deltas::default();
        let blocked: Rc<RefCell<BTreeSet<TileId>>> = Default::default();
        let config = StreamingConfig {
            gpu_quad_quota: 2,
            ..test_config()
        };
        let blocked_clone = blocked.clone();
        let mut scheduler = Scheduler::new(
            "imagery",
            config,
            RecordingFetcher::default(),
            recording_sink(&deltas),
        )
        .unwrap()
        .with_readiness(move |quad| !blocked_clone.borrow().contains(&quad.id));
        scheduler.update_camera(overhead_camera(1e6));
        for id in near_view_quads() {
            scheduler.on_quad_received(good_quad(id));
        }

        let [nw, ne, sw, se] = TileId::ROOT.children();
        blocked.borrow_mut().extend([ne, sw, se]);
        scheduler.on_update_timeout();
        assert!(scheduler.gpu_cache().contains(nw));
        let nw_slots: BTreeSet<u32> = nw
            .children()
            .iter()
            .map(|&id| scheduler.gpu_slots().slot_of(id).unwrap())
            .collect();

        *blocked.borrow_mut() = [nw].into_iter().collect();
        scheduler.on_update_timeout();

        let deltas = deltas.borrow();
        assert_eq!(deltas.len(), 2);
        let (added, removed) = &deltas[1];
        assert_eq!(removed.as_slice(), &nw.children());
        assert_eq!(added.as_slice(), &se.children());
        assert!(!scheduler.gpu_cache().contains(nw));
        assert!(scheduler.gpu_cache().contains(se));
        assert_eq!(scheduler.stats().tiles_evicted_from_gpu, 4);

        // Freed slots are reused by the newly resident tiles.
        let se_slots: BTreeSet<u32> = se
            .children()
            .iter()
            .map(|&id| scheduler.gpu_slots().slot_of(id).unwrap())
            .collect();
        assert_eq!(se_slots, nw_slots);
    }

    #[test]
    fn readiness_gates_gpu_residency() {
        let deltas = Deltas::default();
        let mut scheduler = Scheduler::new(
            "imagery",
            test_config(),
            RecordingFetcher::default(),
            recording_sink(&deltas),
        )
        .unwrap()
        .with_readiness(|quad| quad.id != TileId::ROOT);
        scheduler.update_camera(overhead_camera(1e6));
        for id in near_view_quads() {
            scheduler.on_quad_received(good_quad(id));
        }

        scheduler.on_update_timeout();

        // Children of a quad that is not ready are unreachable.
        assert!(deltas.borrow().is_empty());
        assert!(scheduler.gpu_slots().is_empty());
        assert_eq!(
            scheduler.gpu_slots().layer_of(TileId::new(2, 1, 1)),
            tilestream_map::TileLayer::SENTINEL
        );
    }

    #[test]
    fn purge_waits_for_hysteresis() {
        let config = StreamingConfig {
            ram_quad_quota: 2,
            ram_purge_hysteresis: 2,
            ..test_config()
        };
        let mut scheduler =
            Scheduler::new("imagery", config, RecordingFetcher::default(), |_: &ResidencyDelta<'_>| {})
                .unwrap();

        for x in 0..4 {
            scheduler.on_quad_received(quad_at_zoom_3(x));
        }
        scheduler.on_purge_timeout();
        assert_eq!(scheduler.ram_cache().len(), 4);

        scheduler.on_quad_received(quad_at_zoom_3(4));
        scheduler.on_purge_timeout();
        assert_eq!(scheduler.ram_cache().len(), 2);
        assert_eq!(scheduler.stats().quads_purged, 3);
    }

    #[test]
    fn persistence_failure_deletes_cache_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("imagery");
        let mut scheduler =
            Scheduler::new("imagery", test_config(), RecordingFetcher::default(), |_: &ResidencyDelta<'_>| {})
                .unwrap()
                .with_cache_dir(&dir);

        scheduler.on_quad_received(quad_at_zoom_3(0));
        scheduler.on_persist_timeout();
        assert!(dir.join(tile_file_name(TileId::new(3, 0, 0))).exists());

        // A directory where the next tile file should go makes the write fail.
        let blocked = TileId::new(3, 1, 0);
        fs::create_dir(dir.join(tile_file_name(blocked))).unwrap();
        scheduler.on_quad_received(quad_at_zoom_3(1));
        scheduler.on_persist_timeout();

        assert!(!dir.exists());
        assert_eq!(scheduler.stats().persist_failures, 1);

        // The next pass starts over with every cached quad.
        scheduler.on_persist_timeout();
        let mut restored = TileCache::<Quad>::new();
        assert_eq!(restored.read_from_disk(&dir).unwrap(), 2);
    }

    #[test]
    fn cache_dir_is_restored_or_discarded() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("imagery");
        {
            let mut scheduler =
                Scheduler::new("imagery", test_config(), RecordingFetcher::default(), |_: &ResidencyDelta<'_>| {})
                    .unwrap()
                    .with_cache_dir(&dir);
            for x in 0..3 {
                scheduler.on_quad_received(quad_at_zoom_3(x));
            }
            scheduler.on_persist_timeout();
            assert_eq!(scheduler.stats().persist_passes, 1);
        }

        let scheduler =
            Scheduler::new("imagery", test_config(), RecordingFetcher::default(), |_: &ResidencyDelta<'_>| {})
                .unwrap()
                .with_cache_dir(&dir);
        assert_eq!(scheduler.ram_cache().len(), 3);

        fs::write(dir.join(tilestream_map::INDEX_FILE_NAME), b"garbage").unwrap();
        let scheduler =
            Scheduler::new("imagery", test_config(), RecordingFetcher::default(), |_: &ResidencyDelta<'_>| {})
                .unwrap()
                .with_cache_dir(&dir);
        assert!(scheduler.ram_cache().is_empty());
        assert!(!dir.exists());
    }

    #[test]
    fn pump_drives_the_whole_pipeline() {
        let deltas = Deltas::default();
        let mut scheduler = Scheduler::new(
            "imagery",
            test_config(),
            InlineFetcher::new(FreshSource),
            recording_sink(&deltas),
        )
        .unwrap();
        let start = Instant::now();
        scheduler.update_camera_at(overhead_camera(1e6), start);

        // Too early for the debounced update.
        assert_eq!(scheduler.pump_at(start), 0);
        assert_eq!(scheduler.stats().requests_sent, 0);

        let later = start + Duration::from_secs(3600);
        assert_eq!(scheduler.pump_at(later), 0);
        assert_eq!(scheduler.stats().requests_sent, 5);

        // Results are only applied on the next pump, which re-arms the update.
        assert_eq!(scheduler.pump_at(later), 5);
        assert!(scheduler.is_update_scheduled());
        assert!(scheduler.gpu_slots().is_empty());

        scheduler.pump_at(later + Duration::from_secs(3600));
        assert_eq!(scheduler.gpu_slots().len(), 20);
        assert_eq!(deltas.borrow().len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StreamingConfig {
            ram_quad_quota: 0,
            ..Default::default()
        };
        assert!(
            Scheduler::new("imagery", config, RecordingFetcher::default(), |_: &ResidencyDelta<'_>| {})
                .is_err()
        );
    }
}
