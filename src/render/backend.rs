use crate::engine::loading::DecodedImage;
use crate::render::{Color, Viewport};
use nalgebra::Matrix4;

/// Size of a surface in pixels. It's a simple struct to hold width and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl From<Viewport> for SurfaceSize {
    fn from(vp: Viewport) -> Self {
        Self {
            width: vp.width,
            height: vp.height,
        }
    }
}

/// Handle to a texture living inside a [`SceneContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Handle to page geometry living inside a [`SceneContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u64);

/// Handle to a material living inside a [`SceneContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

/// Per-page state handed to the context each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageTransform {
    pub geometry: GeometryId,
    pub material: MaterialId,
    /// Model matrix (pivot, rotation around the spine and depth offset applied).
    pub model: Matrix4<f32>,
    pub visible: bool,
}

/// Everything a context needs to draw one frame of the scene-graph book.
#[derive(Debug)]
pub struct SceneFrame<'a> {
    pub view_projection: Matrix4<f32>,
    pub clear_color: Color,
    pub pages: &'a [PageTransform],
}

/// A live 3D rendering context bound to one surface. Calls occur on the owning engine's task.
pub trait SceneContext: Send {
    fn name(&self) -> &str;

    /// Upload a decoded image as a texture.
    fn create_texture(&mut self, image: &DecodedImage) -> anyhow::Result<TextureId>;

    /// Create a flat page quad of the given size in world units.
    fn create_geometry(&mut self, width: f32, height: f32) -> anyhow::Result<GeometryId>;

    /// Create a material sampling the given texture.
    fn create_material(&mut self, texture: TextureId) -> anyhow::Result<MaterialId>;

    fn release_texture(&mut self, id: TextureId) -> anyhow::Result<()>;
    fn release_geometry(&mut self, id: GeometryId) -> anyhow::Result<()>;
    fn release_material(&mut self, id: MaterialId) -> anyhow::Result<()>;

    /// Resize the drawing buffer of the surface.
    fn resize(&mut self, size: SurfaceSize) -> anyhow::Result<()>;

    /// Draw a single frame.
    fn render(&mut self, frame: &SceneFrame<'_>) -> anyhow::Result<()>;

    /// Force the context to give back its native resources. The context is unusable afterwards.
    fn lose_context(&mut self);
}

/// Capability probe and factory for scene contexts. Hosts attach one to a
/// [`MountPoint`](crate::mount::MountPoint) when 3D rendering is available.
pub trait GraphicsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a 3D context can actually be created on this host.
    fn supports_scene_graph(&self) -> bool;

    /// Create a new context rendering into a surface of the given size.
    fn create_context(&self, size: SurfaceSize) -> anyhow::Result<Box<dyn SceneContext>>;
}
