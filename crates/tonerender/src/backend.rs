//! The narrow seam between [`GpuSurface`](crate::GpuSurface) and whatever
//! actually owns the rendering context.

use std::collections::HashMap;

use filterconfig::FilterParameters;
use image::RgbaImage;

use crate::error::BackendError;
use crate::shaders::{ProgramSource, QuadVertex};

macro_rules! handle {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl Handle for $name {
            const KIND: &'static str = $kind;

            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

/// Typed id for a backend-owned resource.
pub trait Handle: Copy {
    const KIND: &'static str;
    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

handle!(ProgramId, "program");
handle!(GeometryId, "geometry");
handle!(TextureId, "texture");

/// Everything one frame needs. The parameters travel as a single batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub geometry: GeometryId,
    pub texture: TextureId,
    pub params: FilterParameters,
}

/// Mutable rendering context driven from one thread.
///
/// Shader failures surface as [`BackendError::Shader`]; any other error from
/// `compile_program` is treated as equally fatal by the surface.
pub trait GraphicsBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, BackendError>;

    fn create_geometry(&mut self, vertices: &[QuadVertex]) -> Result<GeometryId, BackendError>;

    fn create_texture(&mut self, image: &RgbaImage) -> Result<TextureId, BackendError>;

    /// Replaces the texture contents; the dimensions may change.
    fn replace_texture(
        &mut self,
        texture: TextureId,
        image: &RgbaImage,
    ) -> Result<(), BackendError>;

    fn resize(&mut self, width: u32, height: u32);

    /// Clears the target and draws one frame; not visible until
    /// [`present`](Self::present).
    fn draw(&mut self, call: &DrawCall) -> Result<(), BackendError>;

    fn present(&mut self) -> Result<(), BackendError>;

    fn release_program(&mut self, program: ProgramId);

    fn release_geometry(&mut self, geometry: GeometryId);

    fn release_texture(&mut self, texture: TextureId);
}

/// Id-keyed storage shared by the backends.
#[derive(Debug)]
pub(crate) struct ResourceTable<H, T> {
    next: u64,
    entries: HashMap<u64, T>,
    _handle: std::marker::PhantomData<H>,
}

impl<H, T> Default for ResourceTable<H, T> {
    fn default() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
            _handle: std::marker::PhantomData,
        }
    }
}

impl<H: Handle, T> ResourceTable<H, T> {
    pub(crate) fn insert(&mut self, value: T) -> H {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        H::from_raw(id)
    }

    pub(crate) fn get(&self, handle: H) -> Result<&T, BackendError> {
        self.entries
            .get(&handle.raw())
            .ok_or(BackendError::UnknownHandle {
                kind: H::KIND,
                id: handle.raw(),
            })
    }

    pub(crate) fn get_mut(&mut self, handle: H) -> Result<&mut T, BackendError> {
        self.entries
            .get_mut(&handle.raw())
            .ok_or(BackendError::UnknownHandle {
                kind: H::KIND,
                id: handle.raw(),
            })
    }

    pub(crate) fn remove(&mut self, handle: H) -> Option<T> {
        self.entries.remove(&handle.raw())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_hands_out_distinct_ids() {
        let mut table: ResourceTable<TextureId, &str> = ResourceTable::default();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(*table.get(b).unwrap(), "b");
        assert_eq!(table.remove(a), Some("a"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_handle_names_its_kind() {
        let table: ResourceTable<GeometryId, ()> = ResourceTable::default();
        let err = table.get(GeometryId::from_raw(7)).unwrap_err();
        assert_eq!(err.to_string(), "unknown geometry handle #7");
    }
}
