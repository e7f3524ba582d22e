//! Per (segment, layer) imagery load state

use std::time::Instant;

use crate::core::error::FetchError;
use crate::planet::LayerId;
use crate::render::TextureHandle;
use crate::streaming::{RetryPolicy, Ticket};
use crate::tile::TileAddress;

/// Retry bookkeeping shared by imagery materials and segment terrain.
///
/// At most one ticket is outstanding at a time; a result carrying any other
/// ticket is stale.
#[derive(Clone, Debug, Default)]
pub struct LoadTracker {
    pub ticket: Option<Ticket>,
    pub attempts: u32,
    pub retry_at: Option<Instant>,
    /// No further automatic retries
    pub terminal: bool,
    pub last_error: Option<FetchError>,
}

impl LoadTracker {
    pub fn begin(&mut self, ticket: Ticket) {
        self.ticket = Some(ticket);
    }

    /// True if `ticket` is the outstanding one
    pub fn owns(&self, ticket: Ticket) -> bool {
        self.ticket == Some(ticket)
    }

    pub fn succeed(&mut self) {
        self.ticket = None;
        self.attempts = 0;
        self.retry_at = None;
        self.last_error = None;
    }

    /// Record a failure and schedule the next try.
    ///
    /// # Returns
    /// True if the failure was terminal
    pub fn fail(&mut self, error: FetchError, policy: &RetryPolicy, now: Instant) -> bool {
        self.ticket = None;
        self.attempts += 1;
        let delay = if error.is_permanent() { None } else { policy.delay_after(self.attempts) };
        match delay {
            Some(delay) => self.retry_at = Some(now + delay),
            None => {
                self.terminal = true;
                self.retry_at = None;
            }
        }
        self.last_error = Some(error);
        self.terminal
    }

    /// Give up without trying, e.g. for tiles the provider does not serve.
    pub fn fail_permanently(&mut self, error: FetchError) {
        self.ticket = None;
        self.terminal = true;
        self.retry_at = None;
        self.last_error = Some(error);
    }

    pub fn retry_due(&self, now: Instant) -> bool {
        !self.terminal && self.retry_at.is_none_or(|at| now >= at)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialStatus {
    Empty,
    Loading,
    Ready,
    Error,
}

/// Sub-rectangle of an ancestor's texture covering a descendant tile
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureBias {
    /// Texture coordinate of the descendant's north-west corner
    pub offset: [f32; 2],
    pub scale: f32,
}

impl TextureBias {
    pub const IDENTITY: TextureBias = TextureBias { offset: [0.0, 0.0], scale: 1.0 };

    /// Bias that maps `node`'s uv range into the texture of `source`, an
    /// ancestor of (or equal to) `node`.
    pub fn between(node: TileAddress, source: TileAddress) -> Self {
        let dz = node.zoom.saturating_sub(source.zoom) as u32;
        if dz == 0 {
            return Self::IDENTITY;
        }
        let n = (1u64 << dz) as f64;
        let fx = (node.x as f64 - source.x as f64 * n) / n;
        let fy = (node.y as f64 - source.y as f64 * n) / n;
        Self { offset: [fx as f32, fy as f32], scale: (1.0 / n) as f32 }
    }

    /// Texture coordinate for a uv on the descendant tile
    pub fn apply(&self, uv: [f32; 2]) -> [f32; 2] {
        [self.offset[0] + uv[0] * self.scale, self.offset[1] + uv[1] * self.scale]
    }
}

/// Imagery of one layer on one segment
#[derive(Clone, Debug)]
pub struct Material {
    pub layer: LayerId,
    status: MaterialStatus,
    texture: Option<TextureHandle>,
    /// Layer version of `texture`
    version: u64,
    /// Version being loaded
    requested_version: u64,
    tracker: LoadTracker,
    /// Tile whose texture is currently displayed for this material
    applied_node: Option<TileAddress>,
    bias: TextureBias,
}

impl Material {
    pub fn new(layer: LayerId) -> Self {
        Self {
            layer,
            status: MaterialStatus::Empty,
            texture: None,
            version: 0,
            requested_version: 0,
            tracker: LoadTracker::default(),
            applied_node: None,
            bias: TextureBias::IDENTITY,
        }
    }

    pub fn status(&self) -> MaterialStatus {
        self.status
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ticket(&self) -> Option<Ticket> {
        self.tracker.ticket
    }

    pub fn attempts(&self) -> u32 {
        self.tracker.attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.tracker.terminal
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.tracker.last_error.as_ref()
    }

    pub fn applied_node(&self) -> Option<TileAddress> {
        self.applied_node
    }

    pub fn bias(&self) -> TextureBias {
        self.bias
    }

    /// Whether a load should be issued now for layer data at `version`.
    ///
    /// False while a load is in flight, when the texture is current, after a
    /// terminal failure and during back-off.
    pub fn wants_load(&self, version: u64, now: Instant) -> bool {
        match self.status {
            MaterialStatus::Loading => false,
            MaterialStatus::Ready => self.version != version && self.tracker.retry_due(now),
            MaterialStatus::Empty => !self.tracker.terminal,
            MaterialStatus::Error => self.tracker.retry_due(now),
        }
    }

    /// Transition to `Loading` under `ticket`.
    pub fn begin_loading(&mut self, ticket: Ticket, version: u64) {
        self.status = MaterialStatus::Loading;
        self.requested_version = version;
        self.tracker.begin(ticket);
    }

    /// Install a loaded texture.
    ///
    /// # Returns
    /// `Ok` with the texture it replaced, or `Err` handing back `texture` if
    /// `ticket` is stale; either way the returned handle is the caller's to delete
    pub fn complete(
        &mut self,
        ticket: Ticket,
        texture: TextureHandle,
        node: TileAddress,
    ) -> Result<Option<TextureHandle>, TextureHandle> {
        if !self.tracker.owns(ticket) {
            return Err(texture);
        }
        self.tracker.succeed();
        self.status = MaterialStatus::Ready;
        self.version = self.requested_version;
        self.applied_node = Some(node);
        self.bias = TextureBias::IDENTITY;
        Ok(self.texture.replace(texture))
    }

    /// Take over a texture parked in the cache.
    pub fn adopt(
        &mut self,
        texture: TextureHandle,
        version: u64,
        node: TileAddress,
    ) -> Option<TextureHandle> {
        self.tracker.succeed();
        self.status = MaterialStatus::Ready;
        self.version = version;
        self.applied_node = Some(node);
        self.bias = TextureBias::IDENTITY;
        self.texture.replace(texture)
    }

    /// Record a failed load. Returns false if `ticket` is stale.
    pub fn fail(
        &mut self,
        ticket: Ticket,
        error: FetchError,
        policy: &RetryPolicy,
        now: Instant,
    ) -> bool {
        if !self.tracker.owns(ticket) {
            return false;
        }
        self.tracker.fail(error, policy, now);
        self.status = MaterialStatus::Error;
        true
    }

    /// Mark the layer as unavailable for this tile.
    pub fn fail_permanently(&mut self, error: FetchError) {
        self.tracker.fail_permanently(error);
        self.status = MaterialStatus::Error;
    }

    /// Drop the outstanding request, e.g. when it went stale in the queue.
    pub fn abort(&mut self) -> Option<Ticket> {
        let ticket = self.tracker.ticket.take();
        if self.status == MaterialStatus::Loading {
            self.status = self.idle_status();
        }
        ticket
    }

    /// Forget failures so the next frame asks again.
    pub fn invalidate(&mut self) -> Option<Ticket> {
        let ticket = self.abort();
        self.tracker.reset();
        if self.status == MaterialStatus::Error {
            self.status = self.idle_status();
        }
        ticket
    }

    /// Status once nothing is loading or failed
    fn idle_status(&self) -> MaterialStatus {
        if self.texture.is_some() { MaterialStatus::Ready } else { MaterialStatus::Empty }
    }

    /// Record which tile's texture is displayed and how it is mapped.
    pub fn apply(&mut self, source: TileAddress, bias: TextureBias) {
        self.applied_node = Some(source);
        self.bias = bias;
    }

    pub fn take_texture(&mut self) -> Option<TextureHandle> {
        self.texture.take()
    }

    /// Forget the texture handle without deleting it (its context is gone).
    pub fn forget_gpu(&mut self) {
        self.texture = None;
        self.tracker.reset();
        self.status = MaterialStatus::Empty;
        self.applied_node = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_bias_for_ancestor() {
        let node = TileAddress::new(3, 2, 2);
        assert_eq!(TextureBias::between(node, node), TextureBias::IDENTITY);

        // Parent (1, 1, 1): node is its north-east child
        let bias = TextureBias::between(node, TileAddress::new(1, 1, 1));
        assert_eq!(bias, TextureBias { offset: [0.5, 0.0], scale: 0.5 });

        let bias = TextureBias::between(TileAddress::new(5, 6, 3), TileAddress::new(0, 0, 0));
        assert_eq!(bias.offset, [0.625, 0.75]);
        assert_eq!(bias.scale, 0.125);
        assert_eq!(bias.apply([1.0, 1.0]), [0.75, 0.875]);
    }

    #[test]
    fn test_load_lifecycle() {
        let now = Instant::now();
        let addr = TileAddress::new(0, 0, 0);
        let mut m = Material::new(LayerId(1));
        assert!(m.wants_load(0, now));

        m.begin_loading(Ticket(1), 0);
        assert_eq!(m.status(), MaterialStatus::Loading);
        // A second request while loading is coalesced
        assert!(!m.wants_load(0, now));

        assert_eq!(m.complete(Ticket(1), TextureHandle(7), addr), Ok(None));
        assert_eq!(m.status(), MaterialStatus::Ready);
        assert_eq!(m.applied_node(), Some(addr));
        assert!(!m.wants_load(0, now));
        // New layer version reloads, keeping the old texture meanwhile
        assert!(m.wants_load(1, now));

        m.begin_loading(Ticket(2), 1);
        assert_eq!(m.complete(Ticket(2), TextureHandle(8), addr), Ok(Some(TextureHandle(7))));
        assert_eq!(m.version(), 1);
    }

    #[test]
    fn test_stale_completion_rejected() {
        let mut m = Material::new(LayerId(1));
        m.begin_loading(Ticket(1), 0);
        m.abort();
        assert_eq!(m.status(), MaterialStatus::Empty);
        let stale = m.complete(Ticket(1), TextureHandle(3), TileAddress::new(0, 0, 0));
        assert_eq!(stale, Err(TextureHandle(3)));
        assert!(!m.fail(Ticket(1), FetchError::Transport("x".into()), &policy(), Instant::now()));
    }

    #[test]
    fn test_backoff_then_terminal() {
        let t0 = Instant::now();
        let mut m = Material::new(LayerId(1));
        let err = || FetchError::Transport("timeout".into());

        m.begin_loading(Ticket(1), 0);
        assert!(m.fail(Ticket(1), err(), &policy(), t0));
        assert_eq!(m.status(), MaterialStatus::Error);
        assert!(!m.wants_load(0, t0));
        assert!(m.wants_load(0, t0 + Duration::from_millis(100)));

        m.begin_loading(Ticket(2), 0);
        m.fail(Ticket(2), err(), &policy(), t0);
        assert!(m.wants_load(0, t0 + Duration::from_millis(200)));

        m.begin_loading(Ticket(3), 0);
        m.fail(Ticket(3), err(), &policy(), t0);
        assert!(m.is_terminal());
        assert!(!m.wants_load(0, t0 + Duration::from_secs(3600)));

        // Invalidation revives it
        m.invalidate();
        assert_eq!(m.status(), MaterialStatus::Empty);
        assert!(m.wants_load(0, t0));
    }

    #[test]
    fn test_permanent_error_is_terminal() {
        let mut m = Material::new(LayerId(1));
        m.begin_loading(Ticket(1), 0);
        let error = FetchError::NotFound(TileAddress::new(0, 0, 1));
        m.fail(Ticket(1), error, &policy(), Instant::now());
        assert!(m.is_terminal());
        assert_eq!(m.attempts(), 1);
    }
}
