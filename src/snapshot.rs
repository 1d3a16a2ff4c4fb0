//! Immutable per-poll view of the shared record.

use std::fmt;
use std::sync::Arc;

use crate::metadata::FrameMetadata;
use crate::texture::ClientTexture;
use crate::types::{OverlayFrameConfig, ShmConfig};

/// What a [`Snapshot`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotState {
    /// No feeder attached, or the region was never written.
    Empty,
    /// The frame targets other consumer kinds.
    IncorrectKind,
    /// The frame was rendered on a different GPU adapter.
    IncorrectGpu,
    /// Metadata only; no texture was requested or there is nothing to show.
    ValidWithoutTexture,
    /// Metadata plus a client texture holding the frame.
    ValidWithTexture,
}

enum SnapshotKind {
    Empty,
    IncorrectKind,
    IncorrectGpu,
    ValidWithoutTexture(FrameMetadata),
    ValidWithTexture { metadata: FrameMetadata, texture: Arc<dyn ClientTexture> },
}

/// One poll's result. Clones share the same allocation.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotKind>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self { inner: Arc::new(SnapshotKind::Empty) }
    }

    pub(crate) fn incorrect_kind() -> Self {
        Self { inner: Arc::new(SnapshotKind::IncorrectKind) }
    }

    pub(crate) fn incorrect_gpu() -> Self {
        Self { inner: Arc::new(SnapshotKind::IncorrectGpu) }
    }

    /// Metadata-only snapshot; `Empty` unless a feeder is attached.
    pub(crate) fn from_metadata(metadata: FrameMetadata) -> Self {
        if !metadata.is_valid() {
            return Self::empty();
        }
        Self { inner: Arc::new(SnapshotKind::ValidWithoutTexture(metadata)) }
    }

    pub(crate) fn with_texture(metadata: FrameMetadata, texture: Arc<dyn ClientTexture>) -> Self {
        Self { inner: Arc::new(SnapshotKind::ValidWithTexture { metadata, texture }) }
    }

    pub fn state(&self) -> SnapshotState {
        match &*self.inner {
            SnapshotKind::Empty => SnapshotState::Empty,
            SnapshotKind::IncorrectKind => SnapshotState::IncorrectKind,
            SnapshotKind::IncorrectGpu => SnapshotState::IncorrectGpu,
            SnapshotKind::ValidWithoutTexture(_) => SnapshotState::ValidWithoutTexture,
            SnapshotKind::ValidWithTexture { .. } => SnapshotState::ValidWithTexture,
        }
    }

    pub fn metadata(&self) -> Option<&FrameMetadata> {
        match &*self.inner {
            SnapshotKind::ValidWithoutTexture(metadata)
            | SnapshotKind::ValidWithTexture { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata().is_some()
    }

    pub fn has_texture(&self) -> bool {
        matches!(&*self.inner, SnapshotKind::ValidWithTexture { .. })
    }

    /// Zero when there is no metadata.
    pub fn render_cache_key(&self) -> u64 {
        self.metadata().map(FrameMetadata::render_cache_key).unwrap_or_default()
    }

    pub fn session_id(&self) -> u64 {
        self.metadata().map(|m| m.session_id).unwrap_or_default()
    }

    /// Frame number, for logs only.
    pub fn frame_number_for_debugging(&self) -> u64 {
        self.metadata().map(|m| m.frame_number).unwrap_or_default()
    }

    /// Frame configuration; defaults when there is no metadata.
    pub fn config(&self) -> ShmConfig {
        self.metadata().map(|m| m.config).unwrap_or_default()
    }

    pub fn overlay_count(&self) -> usize {
        self.metadata().map(FrameMetadata::overlay_count).unwrap_or(0)
    }

    /// # Panics
    ///
    /// If `index >= self.overlay_count()`.
    pub fn overlay_frame_config(&self, index: usize) -> &OverlayFrameConfig {
        let count = self.overlay_count();
        match self.metadata() {
            Some(metadata) if index < count => &metadata.overlay_frame_configs[index],
            _ => panic!("Asked for overlay {index}, but there are {count} overlays"),
        }
    }

    /// The client texture, downcast to the backend's concrete type.
    ///
    /// # Panics
    ///
    /// If the snapshot is not `ValidWithTexture` or the texture is not a `T`.
    pub fn texture<T: ClientTexture>(&self) -> &T {
        match &*self.inner {
            SnapshotKind::ValidWithTexture { texture, .. } => {
                texture.as_any().downcast_ref::<T>().unwrap_or_else(|| {
                    panic!("Snapshot texture is not a {}", std::any::type_name::<T>())
                })
            }
            _ => panic!("Snapshot in state {:?} has no texture", self.state()),
        }
    }

    /// The client texture without downcasting.
    pub fn client_texture(&self) -> Option<&Arc<dyn ClientTexture>> {
        match &*self.inner {
            SnapshotKind::ValidWithTexture { texture, .. } => Some(texture),
            _ => None,
        }
    }

    /// Whether both snapshots are the same allocation.
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Snapshot");
        s.field("state", &self.state());
        if let Some(metadata) = self.metadata() {
            s.field("frame_number", &metadata.frame_number)
                .field("session_id", &format_args!("{:#x}", metadata.session_id))
                .field("overlays", &metadata.overlay_count());
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FRAME_METADATA_MAGIC;
    use crate::types::{HeaderFlags, PixelSize};
    use std::any::Any;

    struct FakeTexture(PixelSize);

    impl ClientTexture for FakeTexture {
        fn dimensions(&self) -> PixelSize {
            self.0
        }
        fn swapchain_index(&self) -> u8 {
            0
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct OtherTexture;

    impl ClientTexture for OtherTexture {
        fn dimensions(&self) -> PixelSize {
            PixelSize::default()
        }
        fn swapchain_index(&self) -> u8 {
            0
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn valid_metadata(overlays: u8) -> FrameMetadata {
        let mut metadata = FrameMetadata {
            magic: FRAME_METADATA_MAGIC,
            frame_number: 5,
            session_id: 0xAA,
            overlay_frame_count: overlays,
            ..Default::default()
        };
        metadata.flags.set(HeaderFlags::FEEDER_ATTACHED);
        for (i, overlay) in metadata.overlay_frame_configs.iter_mut().enumerate() {
            overlay.overlay_id = i as u64 + 100;
        }
        metadata
    }

    #[test]
    fn invalid_metadata_becomes_empty() {
        let snapshot = Snapshot::from_metadata(FrameMetadata::default());
        assert_eq!(snapshot.state(), SnapshotState::Empty);
        assert!(!snapshot.has_metadata());
        assert_eq!(snapshot.render_cache_key(), 0);
        assert_eq!(snapshot.overlay_count(), 0);
        assert_eq!(snapshot.config(), ShmConfig::default());
    }

    #[test]
    fn metadata_accessors() {
        let metadata = valid_metadata(2);
        let snapshot = Snapshot::from_metadata(metadata);
        assert_eq!(snapshot.state(), SnapshotState::ValidWithoutTexture);
        assert!(snapshot.has_metadata());
        assert!(!snapshot.has_texture());
        assert_eq!(snapshot.session_id(), 0xAA);
        assert_eq!(snapshot.frame_number_for_debugging(), 5);
        assert_eq!(snapshot.render_cache_key(), metadata.render_cache_key());
        assert_eq!(snapshot.overlay_count(), 2);
        assert_eq!(snapshot.overlay_frame_config(1).overlay_id, 101);
    }

    #[test]
    #[should_panic(expected = "Asked for overlay 2, but there are 2 overlays")]
    fn overlay_index_is_bounds_checked() {
        let snapshot = Snapshot::from_metadata(valid_metadata(2));
        let _ = snapshot.overlay_frame_config(2);
    }

    #[test]
    #[should_panic(expected = "Asked for overlay 9, but there are 2 overlays")]
    fn overlay_index_past_the_end_panics() {
        let snapshot = Snapshot::from_metadata(valid_metadata(2));
        let _ = snapshot.overlay_frame_config(9);
    }

    #[test]
    #[should_panic(expected = "Asked for overlay 0, but there are 0 overlays")]
    fn snapshot_without_metadata_has_no_overlays() {
        let _ = Snapshot::empty().overlay_frame_config(0);
    }

    #[test]
    #[should_panic(expected = "has no texture")]
    fn texture_requires_texture_state() {
        let snapshot = Snapshot::from_metadata(valid_metadata(1));
        let _ = snapshot.texture::<FakeTexture>();
    }

    #[test]
    #[should_panic(expected = "Snapshot texture is not a")]
    fn texture_requires_matching_type() {
        let snapshot = Snapshot::with_texture(valid_metadata(1), Arc::new(OtherTexture));
        let _ = snapshot.texture::<FakeTexture>();
    }

    #[test]
    fn texture_downcasts_and_clones_share() {
        let size = PixelSize::new(1920, 1080);
        let snapshot = Snapshot::with_texture(valid_metadata(1), Arc::new(FakeTexture(size)));
        assert_eq!(snapshot.state(), SnapshotState::ValidWithTexture);
        assert_eq!(snapshot.texture::<FakeTexture>().dimensions(), size);

        let clone = snapshot.clone();
        assert!(clone.ptr_eq(&snapshot));
        assert!(!Snapshot::empty().ptr_eq(&Snapshot::empty()));
    }

    #[test]
    fn status_snapshots_carry_nothing() {
        for (snapshot, state) in [
            (Snapshot::empty(), SnapshotState::Empty),
            (Snapshot::incorrect_kind(), SnapshotState::IncorrectKind),
            (Snapshot::incorrect_gpu(), SnapshotState::IncorrectGpu),
        ] {
            assert_eq!(snapshot.state(), state);
            assert!(!snapshot.has_metadata());
            assert!(snapshot.client_texture().is_none());
        }
    }
}
