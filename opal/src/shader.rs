//! Shader reflection metadata consumed when building pipeline and descriptor
//! set layouts. Compiling shader text to SPIR-V happens outside this crate;
//! a [`ShaderSource`] carries the binary plus the reflection records the
//! compiler produced.
use crate::vk;
use std::hash::{Hash, Hasher};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderResourceType {
    Input,
    InputAttachment,
    Output,
    PushConstant,
    SpecializationConstant,
    Image,
    ImageSampler,
    ImageStorage,
    Sampler,
    BufferUniform,
    BufferStorage,
}

/// How a resource is bound over its lifetime; `Dynamic` selects the
/// dynamic-offset descriptor types, `UpdateAfterBind` the matching binding
/// flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderResourceMode {
    Static,
    Dynamic,
    UpdateAfterBind,
}

/// One resource declared by a shader, as reported by reflection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderResource {
    pub name: String,
    pub stages: vk::ShaderStageFlags,
    pub ty: ShaderResourceType,
    pub mode: ShaderResourceMode,
    pub set: u32,
    pub binding: u32,
    pub location: u32,
    pub array_size: u32,
    pub offset: u32,
    pub size: u32,
}

impl Default for ShaderResource {
    fn default() -> Self {
        ShaderResource {
            name: String::new(),
            stages: vk::ShaderStageFlags::empty(),
            ty: ShaderResourceType::Input,
            mode: ShaderResourceMode::Static,
            set: 0,
            binding: 0,
            location: 0,
            array_size: 1,
            offset: 0,
            size: 0,
        }
    }
}

/// A compiled shader binary plus its reflection, identified by a content id.
#[derive(Clone, Debug)]
pub struct ShaderSource {
    id: u64,
    spirv: Vec<u32>,
    resources: Vec<ShaderResource>,
}

impl ShaderSource {
    pub fn new(spirv: Vec<u32>, resources: Vec<ShaderResource>) -> ShaderSource {
        let mut hasher = fxhash::FxHasher::default();
        spirv.hash(&mut hasher);
        resources.hash(&mut hasher);
        ShaderSource {
            id: hasher.finish(),
            spirv,
            resources,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }

    pub fn resources(&self) -> &[ShaderResource] {
        &self.resources
    }
}

/// Preprocessor definitions applied to a shader source, identified by a
/// content id so two modules built from the same source but different
/// variants never alias in the cache.
#[derive(Clone, Debug, Default)]
pub struct ShaderVariant {
    id: u64,
    preamble: String,
    processes: Vec<String>,
}

impl ShaderVariant {
    pub fn add_definition(&mut self, name: &str, value: &str) {
        self.preamble.push_str(&format!("#define {name} {value}\n"));
        self.processes.push(format!("D{name}={value}"));
        self.update_id();
    }

    pub fn add_definitions(&mut self, definitions: &[(&str, &str)]) {
        for (name, value) in definitions {
            self.add_definition(name, value);
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn processes(&self) -> &[String] {
        &self.processes
    }

    fn update_id(&mut self) {
        self.id = fxhash::hash64(&self.preamble);
    }
}

/// An immutable shader stage description. The `VkShaderModule` itself is
/// created transiently while building a graphics pipeline; what the cache
/// stores is the SPIR-V and the reflection needed for layout construction.
pub struct ShaderModule {
    id: u64,
    stage: vk::ShaderStageFlags,
    entry_point: String,
    spirv: Vec<u32>,
    resources: Vec<ShaderResource>,
}

impl ShaderModule {
    pub fn new(
        stage: vk::ShaderStageFlags,
        source: &ShaderSource,
        entry_point: impl Into<String>,
        variant: &ShaderVariant,
    ) -> ShaderModule {
        let entry_point = entry_point.into();
        let mut hasher = fxhash::FxHasher::default();
        source.id().hash(&mut hasher);
        variant.id().hash(&mut hasher);
        stage.hash(&mut hasher);
        entry_point.hash(&mut hasher);
        ShaderModule {
            id: hasher.finish(),
            stage,
            entry_point,
            spirv: source.spirv().to_vec(),
            resources: source.resources().to_vec(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }

    pub fn resources(&self) -> &[ShaderResource] {
        &self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_id_tracks_content() {
        let mut a = ShaderVariant::default();
        let mut b = ShaderVariant::default();
        assert_eq!(a.id(), b.id());

        a.add_definition("HAS_NORMALS", "1");
        assert_ne!(a.id(), b.id());

        b.add_definition("HAS_NORMALS", "1");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn module_id_depends_on_stage_source_and_variant() {
        let source = ShaderSource::new(vec![0x0723_0203, 42], vec![]);
        let variant = ShaderVariant::default();
        let vert = ShaderModule::new(vk::ShaderStageFlags::VERTEX, &source, "main", &variant);
        let frag = ShaderModule::new(vk::ShaderStageFlags::FRAGMENT, &source, "main", &variant);
        assert_ne!(vert.id(), frag.id());

        let vert_again = ShaderModule::new(vk::ShaderStageFlags::VERTEX, &source, "main", &variant);
        assert_eq!(vert.id(), vert_again.id());

        let other_source = ShaderSource::new(vec![0x0723_0203, 43], vec![]);
        let other = ShaderModule::new(vk::ShaderStageFlags::VERTEX, &other_source, "main", &variant);
        assert_ne!(vert.id(), other.id());
    }
}
