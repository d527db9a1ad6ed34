use std::collections::BTreeMap;
use std::fmt;

use glam::{Mat4, Vec3};

/// A point in 3-D space (single precision).
pub type Point3 = Vec3;

/// Per-vertex surface label assigned by the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SurfaceClass {
    None,
    Wall,
    Floor,
    Ceiling,
    Table,
    Seat,
    Window,
    Door,
}

impl SurfaceClass {
    /// Decode a raw classification byte. Unknown codes map to `None`.
    pub fn from_code(code: u8) -> SurfaceClass {
        match code {
            1 => SurfaceClass::Wall,
            2 => SurfaceClass::Floor,
            3 => SurfaceClass::Ceiling,
            4 => SurfaceClass::Table,
            5 => SurfaceClass::Seat,
            6 => SurfaceClass::Window,
            7 => SurfaceClass::Door,
            _ => SurfaceClass::None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SurfaceClass::None => 0,
            SurfaceClass::Wall => 1,
            SurfaceClass::Floor => 2,
            SurfaceClass::Ceiling => 3,
            SurfaceClass::Table => 4,
            SurfaceClass::Seat => 5,
            SurfaceClass::Window => 6,
            SurfaceClass::Door => 7,
        }
    }
}

/// A triangle mesh fragment in its own local frame.
///
/// `faces` may reference vertices that do not exist; such faces are skipped
/// by [`Mesh::triangle`] and therefore by every engine in this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3>,
    /// Same length as `vertices`, or empty.
    pub normals: Vec<Point3>,
    pub faces: Vec<[u32; 3]>,
    /// Local-to-world transform.
    pub transform: Mat4,
    /// Optional raw per-vertex classification codes.
    pub classification: Option<Vec<u8>>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            normals: Vec::new(),
            faces: Vec::new(),
            transform: Mat4::IDENTITY,
            classification: None,
        }
    }
}

impl Mesh {
    /// Build a mesh with an identity transform and no normals.
    pub fn new(vertices: Vec<Point3>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            faces,
            ..Default::default()
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Whether the mesh contains no geometry.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty() && self.normals.len() == self.vertices.len()
    }

    /// Resolve a face to its three corner positions.
    ///
    /// Returns `None` if the face index or any vertex index is out of range.
    pub fn triangle(&self, face: usize) -> Option<[Point3; 3]> {
        let [a, b, c] = *self.faces.get(face)?;
        Some([
            *self.vertices.get(a as usize)?,
            *self.vertices.get(b as usize)?,
            *self.vertices.get(c as usize)?,
        ])
    }

    /// Iterate over `(face index, corners)` for every valid face.
    pub fn triangles(&self) -> impl Iterator<Item = (usize, [Point3; 3])> + '_ {
        (0..self.faces.len()).filter_map(|i| self.triangle(i).map(|t| (i, t)))
    }

    /// Number of faces whose indices are all in range.
    pub fn valid_face_count(&self) -> usize {
        self.triangles().count()
    }

    /// Vertices mapped through `transform`. Recomputed on every call.
    pub fn world_vertices(&self) -> Vec<Point3> {
        self.vertices
            .iter()
            .map(|v| self.transform.transform_point3(*v))
            .collect()
    }

    /// A copy of this mesh with the transform baked into the vertex and
    /// normal buffers and reset to identity.
    pub fn to_world(&self) -> Mesh {
        let normals = self
            .normals
            .iter()
            .map(|n| self.transform.transform_vector3(*n).normalize_or_zero())
            .collect();
        Mesh {
            vertices: self.world_vertices(),
            normals,
            faces: self.faces.clone(),
            transform: Mat4::IDENTITY,
            classification: self.classification.clone(),
        }
    }

    /// Surface label of a vertex, if classification data is present.
    pub fn vertex_class(&self, vertex: usize) -> Option<SurfaceClass> {
        self.classification
            .as_ref()
            .and_then(|c| c.get(vertex))
            .map(|&code| SurfaceClass::from_code(code))
    }

    /// Majority label of a face's corners; ties go to the first corner.
    pub fn face_class(&self, face: usize) -> Option<SurfaceClass> {
        let [a, b, c] = *self.faces.get(face)?;
        let ca = self.vertex_class(a as usize)?;
        let cb = self.vertex_class(b as usize)?;
        let cc = self.vertex_class(c as usize)?;
        if cb == cc && cb != ca {
            Some(cb)
        } else {
            Some(ca)
        }
    }
}

/// Opaque identifier of a mesh anchor (16 raw bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorId(pub [u8; 16]);

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Mesh fragments keyed by anchor, merged into one mesh on demand.
#[derive(Debug, Clone, Default)]
pub struct CombinedMesh {
    fragments: BTreeMap<AnchorId, Mesh>,
}

impl CombinedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fragment, replacing any previous fragment with the same id.
    /// Returns the replaced fragment.
    pub fn upsert(&mut self, id: AnchorId, mesh: Mesh) -> Option<Mesh> {
        self.fragments.insert(id, mesh)
    }

    pub fn remove(&mut self, id: &AnchorId) -> Option<Mesh> {
        self.fragments.remove(id)
    }

    pub fn get(&self, id: &AnchorId) -> Option<&Mesh> {
        self.fragments.get(id)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Iterate fragments in anchor-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&AnchorId, &Mesh)> {
        self.fragments.iter()
    }

    pub fn total_vertices(&self) -> usize {
        self.fragments.values().map(Mesh::vertex_count).sum()
    }

    pub fn total_faces(&self) -> usize {
        self.fragments.values().map(Mesh::face_count).sum()
    }

    /// Merge every fragment into a single world-space mesh.
    ///
    /// Each fragment's transform is applied to its vertices and normals, face
    /// indices are offset by the number of vertices emitted before it, and
    /// faces referencing vertices outside their own fragment are dropped.
    /// Winding order is preserved. Normals and classification are kept only
    /// if every fragment carries them.
    pub fn flatten(&self) -> Mesh {
        let keep_normals = self.fragments.values().all(Mesh::has_normals);
        let keep_classes = self.fragments.values().all(|m| {
            m.classification
                .as_ref()
                .is_some_and(|c| c.len() == m.vertices.len())
        });

        let mut out = Mesh {
            vertices: Vec::with_capacity(self.total_vertices()),
            faces: Vec::with_capacity(self.total_faces()),
            classification: keep_classes.then(Vec::new),
            ..Default::default()
        };

        for fragment in self.fragments.values() {
            let offset = out.vertices.len() as u32;
            let count = fragment.vertices.len() as u32;

            out.vertices.extend(fragment.world_vertices());
            if keep_normals {
                out.normals.extend(fragment.normals.iter().map(|n| {
                    fragment.transform.transform_vector3(*n).normalize_or_zero()
                }));
            }
            if let (Some(dst), Some(src)) = (out.classification.as_mut(), &fragment.classification) {
                dst.extend_from_slice(src);
            }

            out.faces.extend(
                fragment
                    .faces
                    .iter()
                    .filter(|f| f.iter().all(|&i| i < count))
                    .map(|&[a, b, c]| [a + offset, b + offset, c + offset]),
            );
        }

        out
    }
}
