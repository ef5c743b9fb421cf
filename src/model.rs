use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Result};
use glam::{vec2, vec3, Vec3};
use log::*;

use crate::vertex::Vertex3D;

/// Parses OBJ data from a reader into a deduplicated vertex and
/// index pair: every distinct position/normal/texcoord
/// combination appears once in the vertex list, and the indices
/// reference it. Texture V coordinates are flipped, since OBJ
/// puts the origin at the bottom-left of the image and Vulkan
/// at the top-left.
pub fn parse_obj<R: std::io::BufRead>(reader: &mut R) -> Result<(Vec<Vertex3D>, Vec<u32>)> {
    let (models, _) = tobj::load_obj_buf(
        reader,
        // A single index stream keeps positions, normals and
        // texture coordinates aligned per index.
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Ok(Default::default()),
    )?;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut unique_vertices = HashMap::new();

    for model in &models {
        for index in &model.mesh.indices {
            let pos_offset = (3 * index) as usize;
            let normal_offset = (3 * index) as usize;
            let tex_offset = (2 * index) as usize;

            let normal = if model.mesh.normals.is_empty() {
                Vec3::ZERO
            } else {
                vec3(
                    model.mesh.normals[normal_offset],
                    model.mesh.normals[normal_offset + 1],
                    model.mesh.normals[normal_offset + 2],
                )
            };

            let texcoord = if model.mesh.texcoords.is_empty() {
                vec2(0.0, 0.0)
            } else {
                vec2(
                    model.mesh.texcoords[tex_offset],
                    1.0 - model.mesh.texcoords[tex_offset + 1],
                )
            };

            let vertex = Vertex3D::new(
                vec3(
                    model.mesh.positions[pos_offset],
                    model.mesh.positions[pos_offset + 1],
                    model.mesh.positions[pos_offset + 2],
                ),
                normal,
                vec3(1.0, 1.0, 1.0),
                texcoord,
                Vec3::ZERO,
            );

            // Vertices hash by their float bits, so repeated
            // corners collapse to a single entry.
            if let Some(&index) = unique_vertices.get(&vertex) {
                indices.push(index);
            } else {
                let index = vertices.len() as u32;
                unique_vertices.insert(vertex, index);
                vertices.push(vertex);
                indices.push(index);
            }
        }
    }

    if vertices.is_empty() {
        return Err(anyhow!("OBJ data contains no geometry."));
    }

    compute_tangents(&mut vertices, &indices);

    Ok((vertices, indices))
}

/// Loads an OBJ model from disk.
pub fn load_obj(path: &Path) -> Result<(Vec<Vertex3D>, Vec<u32>)> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Failed to open model {}: {}", path.display(), e))?;

    let (vertices, indices) = parse_obj(&mut BufReader::new(file))?;
    info!(
        "Model {} loaded ({} vertices, {} indices).",
        path.display(),
        vertices.len(),
        indices.len(),
    );

    Ok((vertices, indices))
}

/// Fills in the tangent of every vertex: per-triangle tangents
/// are derived from the texture coordinate gradients and
/// accumulated at each corner, then normalized, so vertices
/// shared between faces get a smoothed tangent.
fn compute_tangents(vertices: &mut [Vertex3D], indices: &[u32]) {
    for triangle in indices.chunks_exact(3) {
        let (i0, i1, i2) = (triangle[0] as usize, triangle[1] as usize, triangle[2] as usize);

        let edge1 = vertices[i1].position - vertices[i0].position;
        let edge2 = vertices[i2].position - vertices[i0].position;
        let delta_uv1 = vertices[i1].texcoord - vertices[i0].texcoord;
        let delta_uv2 = vertices[i2].texcoord - vertices[i0].texcoord;

        let determinant = delta_uv1.x * delta_uv2.y - delta_uv2.x * delta_uv1.y;
        if determinant.abs() < f32::EPSILON {
            continue;
        }

        let tangent = (edge1 * delta_uv2.y - edge2 * delta_uv1.y) / determinant;

        vertices[i0].tangent += tangent;
        vertices[i1].tangent += tangent;
        vertices[i2].tangent += tangent;
    }

    for vertex in vertices.iter_mut() {
        vertex.tangent = vertex.tangent.try_normalize().unwrap_or(Vec3::X);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A unit right triangle with normals and texture
    // coordinates, every corner referenced twice.
    const TRIANGLE_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
vn 0.0 0.0 -1.0
vt 0.0 0.0
vt 1.0 0.0
vt 0.0 1.0
f 1/1/1 2/2/1 3/3/1
f 1/1/1 2/2/1 3/3/1
";

    #[test]
    fn repeated_corners_are_deduplicated() {
        let (vertices, indices) = parse_obj(&mut TRIANGLE_OBJ.as_bytes()).unwrap();

        // Two identical faces, but only three distinct
        // vertices.
        assert_eq!(vertices.len(), 3);
        assert_eq!(indices.len(), 6);
        assert_eq!(&indices[..3], &indices[3..]);
    }

    #[test]
    fn texture_v_is_flipped() {
        let (vertices, _) = parse_obj(&mut TRIANGLE_OBJ.as_bytes()).unwrap();

        let corner = vertices
            .iter()
            .find(|v| v.position == vec3(0.0, 1.0, 0.0))
            .unwrap();

        // vt 0.0 1.0 in the file becomes V = 0.
        assert_eq!(corner.texcoord, vec2(0.0, 0.0));
    }

    #[test]
    fn tangents_follow_the_uv_gradient() {
        let (vertices, _) = parse_obj(&mut TRIANGLE_OBJ.as_bytes()).unwrap();

        // U grows along +X in this triangle, so every tangent
        // points along +X.
        for vertex in &vertices {
            assert!((vertex.tangent.length() - 1.0).abs() < 1e-5);
            assert!(vertex.tangent.x.abs() > 0.99);
        }
    }

    #[test]
    fn empty_obj_is_an_error() {
        assert!(parse_obj(&mut "".as_bytes()).is_err());
    }
}
