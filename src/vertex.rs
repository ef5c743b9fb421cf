use std::hash::{Hash, Hasher};

use vulkanalia::prelude::v1_0::*;
use glam::{vec2, vec3, Vec2, Vec3};
use lazy_static::lazy_static;

/// A vertex of a 3D mesh. The attribute locations skip odd
/// numbers because a vec3 attribute conceptually occupies its
/// location and the next one; keeping them even leaves room
/// and matches the shader interface.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex3D {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
    pub texcoord: Vec2,
    pub tangent: Vec3,
}

impl Vertex3D {
    pub const fn new(
        position: Vec3,
        normal: Vec3,
        color: Vec3,
        texcoord: Vec2,
        tangent: Vec3,
    ) -> Self {
        Self { position, normal, color, texcoord, tangent }
    }

    /// The binding description tells Vulkan at which rate to
    /// load data from memory throughout the vertices: here, one
    /// struct per vertex, from binding 0.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex3D>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// One attribute description per field, with the shader
    /// location, the format and the byte offset within the
    /// struct.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 5] {
        let position = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0)
            .build();

        let normal = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(std::mem::size_of::<Vec3>() as u32)
            .build();

        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(4)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset((2 * std::mem::size_of::<Vec3>()) as u32)
            .build();

        let texcoord = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(6)
            .format(vk::Format::R32G32_SFLOAT)
            .offset((3 * std::mem::size_of::<Vec3>()) as u32)
            .build();

        let tangent = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(8)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset((3 * std::mem::size_of::<Vec3>() + std::mem::size_of::<Vec2>()) as u32)
            .build();

        [position, normal, color, texcoord, tangent]
    }
}

// Equality and hashing go through the float bit patterns, so
// that vertices can key the deduplication map when loading
// models.
impl PartialEq for Vertex3D {
    fn eq(&self, other: &Self) -> bool {
        bits3(self.position) == bits3(other.position)
            && bits3(self.normal) == bits3(other.normal)
            && bits3(self.color) == bits3(other.color)
            && bits2(self.texcoord) == bits2(other.texcoord)
            && bits3(self.tangent) == bits3(other.tangent)
    }
}

impl Eq for Vertex3D {}

impl Hash for Vertex3D {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bits3(self.position).hash(state);
        bits3(self.normal).hash(state);
        bits3(self.color).hash(state);
        bits2(self.texcoord).hash(state);
        bits3(self.tangent).hash(state);
    }
}

fn bits3(v: Vec3) -> [u32; 3] {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
}

fn bits2(v: Vec2) -> [u32; 2] {
    [v.x.to_bits(), v.y.to_bits()]
}

/// A vertex of a 2D overlay mesh: a position in the 2D plane
/// and a color. The locations match the 3D convention of even
/// numbers.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex2D {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex2D {
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex2D>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        let position = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(0)
            .build();

        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(std::mem::size_of::<Vec2>() as u32)
            .build();

        [position, color]
    }
}

lazy_static! {
    /// The 36 vertices of a unit cube centered on the origin,
    /// two triangles per face, outward normals, with tangents
    /// along each face's U direction. Mesh builders scale the
    /// positions to size.
    pub static ref UNIT_CUBE: Vec<Vertex3D> = {
        let face = |normal: Vec3, tangent: Vec3| {
            // The face's local axes: tangent is U, the cross
            // product is V; corners wind counter-clockwise as
            // seen from outside.
            let bitangent = normal.cross(tangent);
            let center = normal * 0.5;
            let corners = [
                center - tangent * 0.5 - bitangent * 0.5,
                center + tangent * 0.5 - bitangent * 0.5,
                center + tangent * 0.5 + bitangent * 0.5,
                center - tangent * 0.5 + bitangent * 0.5,
            ];
            let uvs = [vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(1.0, 1.0), vec2(0.0, 1.0)];

            [0usize, 1, 2, 2, 3, 0].map(|i| Vertex3D::new(
                corners[i],
                normal,
                vec3(1.0, 1.0, 1.0),
                uvs[i],
                tangent,
            ))
        };

        let mut vertices = Vec::with_capacity(36);
        vertices.extend(face(vec3(0.0, 0.0, -1.0), vec3(1.0, 0.0, 0.0)));
        vertices.extend(face(vec3(0.0, 0.0, 1.0), vec3(-1.0, 0.0, 0.0)));
        vertices.extend(face(vec3(-1.0, 0.0, 0.0), vec3(0.0, 0.0, -1.0)));
        vertices.extend(face(vec3(1.0, 0.0, 0.0), vec3(0.0, 0.0, 1.0)));
        vertices.extend(face(vec3(0.0, -1.0, 0.0), vec3(1.0, 0.0, 0.0)));
        vertices.extend(face(vec3(0.0, 1.0, 0.0), vec3(1.0, 0.0, 0.0)));
        vertices
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn vertex3d_layout() {
        assert_eq!(std::mem::size_of::<Vertex3D>(), 56);

        let attributes = Vertex3D::attribute_descriptions();
        assert_eq!(attributes.len(), 5);
        assert_eq!(
            attributes.map(|a| a.location),
            [0, 2, 4, 6, 8],
        );
        assert_eq!(
            attributes.map(|a| a.offset),
            [0, 12, 24, 36, 44],
        );
    }

    #[test]
    fn vertex2d_layout() {
        assert_eq!(std::mem::size_of::<Vertex2D>(), 20);

        let attributes = Vertex2D::attribute_descriptions();
        assert_eq!(attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[1].offset, 8);
    }

    #[test]
    fn binding_stride_matches_struct() {
        assert_eq!(
            Vertex3D::binding_description().stride as usize,
            std::mem::size_of::<Vertex3D>(),
        );
        assert_eq!(
            Vertex2D::binding_description().stride as usize,
            std::mem::size_of::<Vertex2D>(),
        );
    }

    #[test]
    fn identical_vertices_collide_in_a_map() {
        let vertex = Vertex3D::new(
            vec3(1.0, 2.0, 3.0),
            vec3(0.0, 1.0, 0.0),
            vec3(1.0, 1.0, 1.0),
            vec2(0.5, 0.5),
            vec3(1.0, 0.0, 0.0),
        );

        let mut map = HashMap::new();
        map.insert(vertex, 0u32);
        map.insert(vertex, 1u32);
        assert_eq!(map.len(), 1);

        let mut other = vertex;
        other.texcoord = vec2(0.5, 0.25);
        map.insert(other, 2u32);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unit_cube_has_36_vertices() {
        assert_eq!(UNIT_CUBE.len(), 36);

        // All positions on the half-unit cube surface, all
        // normals unit-length and orthogonal to their tangent.
        for v in UNIT_CUBE.iter() {
            assert!(v.position.abs().max_element() <= 0.5 + 1e-6);
            assert!((v.normal.length() - 1.0).abs() < 1e-6);
            assert!(v.normal.dot(v.tangent).abs() < 1e-6);
        }
    }
}
