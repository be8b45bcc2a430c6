// Built-in geometry
//
// A unit cube with per-face normals and colors, matching the pipeline's
// interleaved position/normal/color vertex layout.

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

/// Cube centered at the origin, 2 units wide, 4 vertices per face so the
/// normals stay flat. Indices are counter-clockwise viewed from outside.
pub fn cube() -> (Vec<Vertex>, Vec<u16>) {
    // (normal, color, four corners)
    let faces: [([f32; 3], [f32; 3], [[f32; 3]; 4]); 6] = [
        // +Z front
        (
            [0.0, 0.0, 1.0],
            [0.8, 0.2, 0.2],
            [
                [-1.0, -1.0, 1.0],
                [1.0, -1.0, 1.0],
                [1.0, 1.0, 1.0],
                [-1.0, 1.0, 1.0],
            ],
        ),
        // -Z back
        (
            [0.0, 0.0, -1.0],
            [0.2, 0.8, 0.2],
            [
                [1.0, -1.0, -1.0],
                [-1.0, -1.0, -1.0],
                [-1.0, 1.0, -1.0],
                [1.0, 1.0, -1.0],
            ],
        ),
        // +X right
        (
            [1.0, 0.0, 0.0],
            [0.2, 0.2, 0.8],
            [
                [1.0, -1.0, 1.0],
                [1.0, -1.0, -1.0],
                [1.0, 1.0, -1.0],
                [1.0, 1.0, 1.0],
            ],
        ),
        // -X left
        (
            [-1.0, 0.0, 0.0],
            [0.8, 0.8, 0.2],
            [
                [-1.0, -1.0, -1.0],
                [-1.0, -1.0, 1.0],
                [-1.0, 1.0, 1.0],
                [-1.0, 1.0, -1.0],
            ],
        ),
        // +Y top
        (
            [0.0, 1.0, 0.0],
            [0.8, 0.2, 0.8],
            [
                [-1.0, 1.0, 1.0],
                [1.0, 1.0, 1.0],
                [1.0, 1.0, -1.0],
                [-1.0, 1.0, -1.0],
            ],
        ),
        // -Y bottom
        (
            [0.0, -1.0, 0.0],
            [0.2, 0.8, 0.8],
            [
                [-1.0, -1.0, -1.0],
                [1.0, -1.0, -1.0],
                [1.0, -1.0, 1.0],
                [-1.0, -1.0, 1.0],
            ],
        ),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, color, corners) in faces {
        let base = vertices.len() as u16;
        for pos in corners {
            vertices.push(Vertex { pos, normal, color });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_expected_counts() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
    }

    #[test]
    fn cube_indices_are_in_range() {
        let (vertices, indices) = cube();
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn vertex_layout_matches_pipeline_stride() {
        assert_eq!(std::mem::size_of::<Vertex>(), 9 * std::mem::size_of::<f32>());
    }
}
