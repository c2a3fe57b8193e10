//! Resource binding state tracked by a command buffer between draws.
use crate::vk;
use std::collections::BTreeMap;

/// `set index -> binding index -> array element -> T`, ordered so iteration
/// (and hashing, for cache keys built from it) is deterministic.
pub type BindingMap<T> = BTreeMap<u32, BTreeMap<u32, T>>;

/// A non-owning reference to the resource bound at one array element of one
/// binding. The referenced buffer/image/sampler belongs to scene or material
/// data outside this crate.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    pub(crate) buffer: Option<vk::Buffer>,
    pub(crate) offset: vk::DeviceSize,
    pub(crate) range: vk::DeviceSize,
    pub(crate) image_view: Option<vk::ImageView>,
    pub(crate) image_format: vk::Format,
    pub(crate) sampler: Option<vk::Sampler>,
    pub(crate) dirty: bool,
}

/// The bindings destined for one descriptor set. Maps one-to-one to the
/// descriptor set materialized at flush time.
#[derive(Default)]
pub struct ResourceSet {
    bindings: BindingMap<ResourceInfo>,
    dirty: bool,
}

impl ResourceSet {
    pub fn bindings(&self) -> &BindingMap<ResourceInfo> {
        &self.bindings
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn bind(&mut self, binding: u32, array_element: u32, mut info: ResourceInfo) {
        info.dirty = true;
        self.bindings.entry(binding).or_default().insert(array_element, info);
        self.dirty = true;
    }
}

/// All resources bound by a command buffer, from which descriptor sets are
/// created when a draw is flushed.
#[derive(Default)]
pub struct ResourceBindingState {
    sets: BTreeMap<u32, ResourceSet>,
    dirty: bool,
}

impl ResourceBindingState {
    pub fn reset(&mut self) {
        self.sets.clear();
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn sets(&self) -> &BTreeMap<u32, ResourceSet> {
        &self.sets
    }

    pub(crate) fn sets_mut(&mut self) -> &mut BTreeMap<u32, ResourceSet> {
        &mut self.sets
    }

    pub fn bind_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.bind(
            set,
            binding,
            array_element,
            ResourceInfo {
                buffer: Some(buffer),
                offset,
                range,
                ..Default::default()
            },
        );
    }

    pub fn bind_image(
        &mut self,
        image_view: vk::ImageView,
        image_format: vk::Format,
        sampler: vk::Sampler,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.bind(
            set,
            binding,
            array_element,
            ResourceInfo {
                image_view: Some(image_view),
                image_format,
                sampler: Some(sampler),
                ..Default::default()
            },
        );
    }

    pub fn bind_input(
        &mut self,
        image_view: vk::ImageView,
        image_format: vk::Format,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.bind(
            set,
            binding,
            array_element,
            ResourceInfo {
                image_view: Some(image_view),
                image_format,
                ..Default::default()
            },
        );
    }

    fn bind(&mut self, set: u32, binding: u32, array_element: u32, info: ResourceInfo) {
        self.sets.entry(set).or_default().bind(binding, array_element, info);
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_marks_set_and_state_dirty() {
        let mut state = ResourceBindingState::default();
        assert!(!state.is_dirty());

        state.bind_buffer(vk::Buffer::null(), 0, 64, 1, 3, 0);
        assert!(state.is_dirty());
        assert!(state.sets()[&1].is_dirty());
        assert!(state.sets()[&1].bindings()[&3][&0].dirty);

        state.clear_dirty();
        state.sets_mut().get_mut(&1).unwrap().clear_dirty();
        assert!(!state.is_dirty());
        assert!(!state.sets()[&1].is_dirty());
    }

    #[test]
    fn rebinding_touches_only_its_set() {
        let mut state = ResourceBindingState::default();
        state.bind_buffer(vk::Buffer::null(), 0, 64, 0, 0, 0);
        state.bind_image(vk::ImageView::null(), vk::Format::R8G8B8A8_UNORM, vk::Sampler::null(), 2, 1, 0);

        state.clear_dirty();
        for set in state.sets_mut().values_mut() {
            set.clear_dirty();
        }

        state.bind_buffer(vk::Buffer::null(), 256, 64, 2, 1, 0);
        assert!(!state.sets()[&0].is_dirty());
        assert!(state.sets()[&2].is_dirty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = ResourceBindingState::default();
        state.bind_input(vk::ImageView::null(), vk::Format::D32_SFLOAT, 0, 0, 0);
        state.reset();
        assert!(state.sets().is_empty());
        assert!(!state.is_dirty());
    }
}
