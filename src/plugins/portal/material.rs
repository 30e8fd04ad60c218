use bevy::{
    prelude::*,
    reflect::TypeUuid,
    render::render_resource::{AsBindGroup, ShaderRef, ShaderType},
};

use super::clip_location::{ClipLocations, ClipRect};

const FRONT_LAYER: u32 = 1;
const BACK_LAYER: u32 = 2;
const RECURSIVE: u32 = 4;

/// Surface of a portal, showing the image captured through it in screen space.
#[derive(AsBindGroup, Debug, Clone, TypeUuid)]
#[uuid = "04901b22-de12-43a9-8e2e-79d333201b93"]
pub struct PortalMaterial {
    #[texture(0)]
    #[sampler(1)]
    pub texture: Handle<Image>,
    #[uniform(2)]
    pub uniform: PortalUniform,
}

impl PortalMaterial {
    pub fn new(texture: Handle<Image>, tint: Color) -> PortalMaterial {
        PortalMaterial {
            texture,
            uniform: PortalUniform {
                tint,
                ..default()
            },
        }
    }

    /// The variant drawn on the deepest capture, which shows last frame's image squeezed into the
    /// nested portal rectangle.
    pub fn recursive(texture: Handle<Image>, tint: Color) -> PortalMaterial {
        let mut material = PortalMaterial::new(texture, tint);
        material.uniform.flags |= RECURSIVE;
        material
    }

    pub fn is_recursive(&self) -> bool {
        self.uniform.flags & RECURSIVE != 0
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        if recursive {
            self.uniform.flags |= RECURSIVE;
        } else {
            self.uniform.flags &= !RECURSIVE;
        }
    }

    pub fn set_clip_locations(&mut self, locations: &ClipLocations) {
        self.uniform.flags &= RECURSIVE;
        if let Some(front) = locations.front {
            self.uniform.front = front;
            self.uniform.flags |= FRONT_LAYER;
        }
        if let Some(back) = locations.back {
            self.uniform.back = back;
            self.uniform.flags |= BACK_LAYER;
        }
    }
}

impl Material for PortalMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/portal.wgsl".into()
    }

    fn specialize(
        _pipeline: &bevy::pbr::MaterialPipeline<Self>,
        descriptor: &mut bevy::render::render_resource::RenderPipelineDescriptor,
        _layout: &bevy::render::mesh::MeshVertexBufferLayout,
        _key: bevy::pbr::MaterialPipelineKey<Self>,
    ) -> Result<(), bevy::render::render_resource::SpecializedMeshPipelineError> {
        descriptor.primitive.cull_mode = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, ShaderType)]
pub struct PortalUniform {
    pub tint: Color,
    pub front: ClipRect,
    pub back: ClipRect,
    pub flags: u32,
}
