// Scene state - CPU-side transforms driven by input
//
// Three cube instances in a row; mouse drag rotates the selected one,
// the wheel moves the camera, +/- cycles the selection. All of this is
// plain CPU state sampled once per frame and baked into the uniform
// block, so none of it touches the synchronization-critical path.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};

pub const INSTANCE_COUNT: usize = 3;

/// Uniform block as the shaders see it (std140).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ShaderData {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: [Mat4; INSTANCE_COUNT],
    pub light_pos: Vec4,
    pub selected: u32,
    pub _pad: [u32; 3],
}

pub struct Scene {
    camera_z: f32,
    rotations: [Vec3; INSTANCE_COUNT],
    selected: usize,
    rotate_speed: f32,
    zoom_speed: f32,
}

impl Scene {
    pub fn new(rotate_speed: f32, zoom_speed: f32) -> Self {
        Self {
            camera_z: -9.0,
            rotations: [Vec3::ZERO; INSTANCE_COUNT],
            selected: 1,
            rotate_speed,
            zoom_speed,
        }
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn select_next(&mut self) {
        self.selected = (self.selected + 1) % INSTANCE_COUNT;
    }

    pub fn select_prev(&mut self) {
        self.selected = (self.selected + INSTANCE_COUNT - 1) % INSTANCE_COUNT;
    }

    /// Apply a mouse-drag delta (in pixels) to the selected instance.
    pub fn rotate_selected(&mut self, dx: f32, dy: f32, dt_ms: f32) {
        let rotation = &mut self.rotations[self.selected];
        rotation.x += dy * self.rotate_speed * dt_ms;
        rotation.y -= dx * self.rotate_speed * dt_ms;
    }

    /// Apply a scroll-wheel delta to the camera distance.
    pub fn zoom(&mut self, delta: f32, dt_ms: f32) {
        self.camera_z += delta * self.zoom_speed * dt_ms;
        // Keep the camera outside the instances
        self.camera_z = self.camera_z.min(-3.0);
    }

    /// Uniform block for the current state.
    pub fn shader_data(&self, aspect: f32) -> ShaderData {
        let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 64.0);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;

        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, self.camera_z));

        let model = std::array::from_fn(|i| {
            let position = Vec3::new((i as f32 - 1.0) * 3.0, 0.0, 0.0);
            let rotation = self.rotations[i];
            Mat4::from_translation(position)
                * Mat4::from_quat(Quat::from_euler(
                    glam::EulerRot::XYZ,
                    rotation.x,
                    rotation.y,
                    rotation.z,
                ))
        });

        ShaderData {
            projection,
            view,
            model,
            light_pos: Vec4::new(0.0, -10.0, 10.0, 0.0),
            selected: self.selected as u32,
            _pad: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_size_matches_shader_layout() {
        // 2 + INSTANCE_COUNT mat4s, a vec4, a uint, and tail padding
        assert_eq!(std::mem::size_of::<ShaderData>(), 352);
    }

    #[test]
    fn selection_wraps_both_directions() {
        let mut scene = Scene::new(0.0005, 0.025);
        assert_eq!(scene.selected(), 1);
        scene.select_next();
        assert_eq!(scene.selected(), 2);
        scene.select_next();
        assert_eq!(scene.selected(), 0);
        scene.select_prev();
        assert_eq!(scene.selected(), 2);
    }

    #[test]
    fn drag_rotates_only_the_selected_instance() {
        let mut scene = Scene::new(0.0005, 0.025);
        scene.rotate_selected(10.0, 0.0, 16.0);
        let data = scene.shader_data(1.0);
        assert_ne!(data.model[1], Mat4::from_translation(Vec3::ZERO));
        // Neighbours keep their plain translations
        assert_eq!(
            data.model[0],
            Mat4::from_translation(Vec3::new(-3.0, 0.0, 0.0))
        );
        assert_eq!(
            data.model[2],
            Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0))
        );
    }

    #[test]
    fn zoom_is_clamped_in_front_of_the_scene() {
        let mut scene = Scene::new(0.0005, 0.025);
        scene.zoom(1000.0, 1000.0);
        let data = scene.shader_data(1.0);
        assert!(data.view.w_axis.z <= -3.0);
    }
}
