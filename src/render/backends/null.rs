use crate::engine::loading::DecodedImage;
use crate::render::backend::{
    GeometryId, GraphicsProvider, MaterialId, SceneContext, SceneFrame, SurfaceSize, TextureId,
};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Resource accounting shared between a [`NullGraphics`] provider and every context it creates.
#[derive(Debug, Default)]
pub struct NullStats {
    pub contexts_created: AtomicU64,
    pub contexts_lost: AtomicU64,
    pub textures_created: AtomicU64,
    pub textures_released: AtomicU64,
    pub geometries_created: AtomicU64,
    pub geometries_released: AtomicU64,
    pub materials_created: AtomicU64,
    pub materials_released: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub resizes: AtomicU64,
    /// Surface size of the most recent resize, packed as `width << 32 | height`.
    last_size: AtomicU64,
}

impl NullStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    pub fn last_size(&self) -> SurfaceSize {
        let packed = self.last_size.load(Ordering::SeqCst);
        SurfaceSize {
            width: (packed >> 32) as u32,
            height: packed as u32,
        }
    }

    /// Resources created but not released yet, across textures, geometries and materials.
    pub fn live_resources(&self) -> u64 {
        let created = Self::get(&self.textures_created)
            + Self::get(&self.geometries_created)
            + Self::get(&self.materials_created);
        let released = Self::get(&self.textures_released)
            + Self::get(&self.geometries_released)
            + Self::get(&self.materials_released);
        created - released
    }
}

/// Null graphics provider. Creates contexts that draw nothing but account for everything.
pub struct NullGraphics {
    stats: Arc<NullStats>,
    supported: bool,
    fail_texture_release: Arc<AtomicBool>,
}

impl NullGraphics {
    /// Creates a provider that reports 3D support.
    pub fn new() -> Self {
        Self {
            stats: Arc::new(NullStats::default()),
            supported: true,
            fail_texture_release: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a provider that reports no 3D support, as a host without a GPU would.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn stats(&self) -> Arc<NullStats> {
        self.stats.clone()
    }

    /// Make every texture release fail from now on.
    pub fn fail_texture_release(&self, fail: bool) {
        self.fail_texture_release.store(fail, Ordering::SeqCst);
    }
}

impl Default for NullGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsProvider for NullGraphics {
    fn name(&self) -> &str {
        "NullGraphics"
    }

    fn supports_scene_graph(&self) -> bool {
        self.supported
    }

    fn create_context(&self, size: SurfaceSize) -> Result<Box<dyn SceneContext>> {
        if !self.supported {
            bail!("NullGraphics was created without scene-graph support");
        }
        NullStats::bump(&self.stats.contexts_created);
        Ok(Box::new(NullContext::new(
            size,
            self.stats.clone(),
            self.fail_texture_release.clone(),
        )))
    }
}

/// Context handed out by [`NullGraphics`].
pub struct NullContext {
    size: SurfaceSize,
    stats: Arc<NullStats>,
    fail_texture_release: Arc<AtomicBool>,
    next_id: u64,
    textures: BTreeSet<u64>,
    geometries: BTreeSet<u64>,
    materials: BTreeSet<u64>,
    lost: bool,
}

impl NullContext {
    fn new(size: SurfaceSize, stats: Arc<NullStats>, fail_texture_release: Arc<AtomicBool>) -> Self {
        Self {
            size,
            stats,
            fail_texture_release,
            next_id: 1,
            textures: BTreeSet::new(),
            geometries: BTreeSet::new(),
            materials: BTreeSet::new(),
            lost: false,
        }
    }

    fn alloc(&mut self) -> Result<u64> {
        if self.lost {
            bail!("context has been lost");
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }
}

impl SceneContext for NullContext {
    fn name(&self) -> &str {
        "NullContext"
    }

    fn create_texture(&mut self, image: &DecodedImage) -> Result<TextureId> {
        if image.width == 0 || image.height == 0 {
            bail!("cannot upload empty image {}", image.locator);
        }
        let id = self.alloc()?;
        self.textures.insert(id);
        NullStats::bump(&self.stats.textures_created);
        Ok(TextureId(id))
    }

    fn create_geometry(&mut self, _width: f32, _height: f32) -> Result<GeometryId> {
        let id = self.alloc()?;
        self.geometries.insert(id);
        NullStats::bump(&self.stats.geometries_created);
        Ok(GeometryId(id))
    }

    fn create_material(&mut self, texture: TextureId) -> Result<MaterialId> {
        if !self.textures.contains(&texture.0) {
            bail!("unknown texture {texture:?}");
        }
        let id = self.alloc()?;
        self.materials.insert(id);
        NullStats::bump(&self.stats.materials_created);
        Ok(MaterialId(id))
    }

    fn release_texture(&mut self, id: TextureId) -> Result<()> {
        if self.fail_texture_release.load(Ordering::SeqCst) {
            bail!("driver refused to free texture {id:?}");
        }
        if !self.textures.remove(&id.0) {
            return Err(anyhow!("texture {id:?} released twice or never created"));
        }
        NullStats::bump(&self.stats.textures_released);
        Ok(())
    }

    fn release_geometry(&mut self, id: GeometryId) -> Result<()> {
        if !self.geometries.remove(&id.0) {
            return Err(anyhow!("geometry {id:?} released twice or never created"));
        }
        NullStats::bump(&self.stats.geometries_released);
        Ok(())
    }

    fn release_material(&mut self, id: MaterialId) -> Result<()> {
        if !self.materials.remove(&id.0) {
            return Err(anyhow!("material {id:?} released twice or never created"));
        }
        NullStats::bump(&self.stats.materials_released);
        Ok(())
    }

    fn resize(&mut self, size: SurfaceSize) -> Result<()> {
        self.size = size;
        self.stats
            .last_size
            .store(((size.width as u64) << 32) | size.height as u64, Ordering::SeqCst);
        NullStats::bump(&self.stats.resizes);
        Ok(())
    }

    fn render(&mut self, _frame: &SceneFrame<'_>) -> Result<()> {
        if self.lost {
            bail!("render on lost context");
        }
        NullStats::bump(&self.stats.frames_rendered);
        Ok(())
    }

    fn lose_context(&mut self) {
        if !self.lost {
            self.lost = true;
            NullStats::bump(&self.stats.contexts_lost);
        }
    }
}
