//! Reader and writer for LRAW, the binary capture dump produced on-device.
//!
//! All values are little-endian. Layout:
//!
//! ```text
//! header   32 B   "LRAW" | u16 version | u16 flags | u32 anchors | u32 textures
//!                 | u32 depth frames | 12 B reserved
//! anchor          16 B id | 4x4 f32 transform | u32 vertices | u32 faces
//!                 | u8 has_class | vertices f32x3 | normals f32x3 | faces u32x3
//!                 | u8 class per vertex (if has_class and HAS_CLASSIFICATIONS)
//! texture         16 B id | f64 timestamp | 4x4 f32 transform | 3x3 f32 intrinsics
//!                 | u32 width | u32 height | u32 length | encoded image
//! depth           16 B id | f64 timestamp | 4x4 f32 transform | 3x3 f32 intrinsics
//!                 | u32 width | u32 height | f32 depth per pixel
//!                 | u8 confidence per pixel (if HAS_CONFIDENCE_MAPS)
//! ```
//!
//! Matrices are stored column-major.

use std::fs::File;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};
use memmap2::Mmap;
use tracing::debug;

use crate::error::{Result, ScanMetricsError};
use crate::sync::{
    CameraIntrinsics, ColorFrame, ColorImage, ConfidenceMap, DepthFrame, DepthMap, Resolution,
};
use crate::types::{AnchorId, CombinedMesh, Mesh};

pub const MAGIC: [u8; 4] = *b"LRAW";
pub const HEADER_LEN: usize = 32;
pub const CURRENT_VERSION: u16 = 1;

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LrawFlags(pub u16);

impl LrawFlags {
    pub const HAS_CLASSIFICATIONS: u16 = 1;
    pub const HAS_CONFIDENCE_MAPS: u16 = 2;
    pub const HAS_TEXTURE_FRAMES: u16 = 4;
    pub const HAS_DEPTH_FRAMES: u16 = 8;
    pub const COMPRESSED: u16 = 16;

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 4],
    version: u16,
    flags: u16,
    anchor_count: u32,
    texture_count: u32,
    depth_count: u32,
    reserved: [u8; 12],
}

/// One mesh anchor: local-space geometry plus its anchor transform.
#[derive(Debug, Clone)]
pub struct MeshAnchor {
    pub id: AnchorId,
    pub mesh: Mesh,
}

#[derive(Debug, Clone)]
pub struct TextureFrame {
    pub id: [u8; 16],
    pub timestamp: f64,
    /// Camera-to-world transform.
    pub camera_transform: Mat4,
    pub intrinsics: CameraIntrinsics,
    pub image: ColorImage,
}

impl TextureFrame {
    pub fn to_color_frame(&self) -> ColorFrame {
        ColorFrame {
            timestamp: self.timestamp,
            image: self.image.clone(),
            camera_transform: self.camera_transform,
            intrinsics: self.intrinsics,
            depth: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepthCapture {
    pub id: [u8; 16],
    pub timestamp: f64,
    pub camera_transform: Mat4,
    /// Intrinsics in pixels of the depth map.
    pub intrinsics: CameraIntrinsics,
    pub depth: DepthMap,
    pub confidence: Option<ConfidenceMap>,
}

impl DepthCapture {
    pub fn to_depth_frame(&self) -> DepthFrame {
        DepthFrame {
            timestamp: self.timestamp,
            depth: self.depth.clone(),
            confidence: self.confidence.clone(),
        }
    }
}

/// Decoded contents of an LRAW file.
#[derive(Debug, Clone, Default)]
pub struct LrawCapture {
    pub version: u16,
    pub flags: LrawFlags,
    pub anchors: Vec<MeshAnchor>,
    pub texture_frames: Vec<TextureFrame>,
    pub depth_frames: Vec<DepthCapture>,
}

impl LrawCapture {
    /// All anchors keyed by id. A repeated id replaces the earlier anchor.
    pub fn combined_mesh(&self) -> CombinedMesh {
        let mut combined = CombinedMesh::new();
        for anchor in &self.anchors {
            combined.upsert(anchor.id, anchor.mesh.clone());
        }
        combined
    }
}

/// Memory-map and decode an LRAW file.
pub fn read_lraw(path: &Path) -> Result<LrawCapture> {
    let file = File::open(path).map_err(|e| {
        ScanMetricsError::Input(format!("Failed to open {}: {e}", path.display()))
    })?;
    let len = file.metadata()?.len();
    if len < HEADER_LEN as u64 {
        return Err(ScanMetricsError::Format(format!(
            "{} is {len} bytes, shorter than the LRAW header",
            path.display()
        )));
    }
    // SAFETY: the map is read-only and dropped before this function returns;
    // the capture file is not expected to change while it is being decoded.
    let map = unsafe { Mmap::map(&file)? };
    parse_lraw(&map)
}

/// Decode an LRAW capture from bytes.
pub fn parse_lraw(bytes: &[u8]) -> Result<LrawCapture> {
    let mut r = ByteReader::new(bytes);
    let raw: RawHeader = bytemuck::pod_read_unaligned(r.take(HEADER_LEN, "header")?);
    if raw.magic != MAGIC {
        return Err(ScanMetricsError::Format(format!(
            "Invalid LRAW magic: {:02x?}",
            raw.magic
        )));
    }
    let version = u16::from_le(raw.version);
    let flags = LrawFlags(u16::from_le(raw.flags));
    let anchor_count = u32::from_le(raw.anchor_count);
    let texture_count = u32::from_le(raw.texture_count);
    let depth_count = u32::from_le(raw.depth_count);

    if flags.contains(LrawFlags::COMPRESSED) {
        return Err(ScanMetricsError::Format(
            "Compressed LRAW payloads are not supported".into(),
        ));
    }

    debug!(
        version,
        flags = flags.0,
        anchors = anchor_count,
        textures = texture_count,
        depth = depth_count,
        "LRAW header"
    );

    let classes = flags.contains(LrawFlags::HAS_CLASSIFICATIONS);
    let confidence = flags.contains(LrawFlags::HAS_CONFIDENCE_MAPS);

    let anchors = (0..anchor_count)
        .map(|_| read_anchor(&mut r, classes))
        .collect::<Result<Vec<_>>>()?;
    let texture_frames = (0..texture_count)
        .map(|_| read_texture_frame(&mut r))
        .collect::<Result<Vec<_>>>()?;
    let depth_frames = (0..depth_count)
        .map(|_| read_depth_frame(&mut r, confidence))
        .collect::<Result<Vec<_>>>()?;

    if r.remaining() > 0 {
        debug!(trailing = r.remaining(), "Ignoring trailing bytes after LRAW payload");
    }

    Ok(LrawCapture {
        version,
        flags,
        anchors,
        texture_frames,
        depth_frames,
    })
}

fn read_anchor(r: &mut ByteReader<'_>, file_has_classes: bool) -> Result<MeshAnchor> {
    let id = AnchorId(r.array16("anchor id")?);
    let transform = r.mat4("anchor transform")?;
    let vertex_count = r.u32("vertex count")? as usize;
    let face_count = r.u32("face count")? as usize;
    let has_class = r.u8("classification flag")? != 0;

    let vertices = r.vec3s(vertex_count, "vertices")?;
    let normals = r.vec3s(vertex_count, "normals")?;
    let faces = r.u32x3s(face_count, "faces")?;
    let classification = if has_class && file_has_classes {
        Some(r.take(vertex_count, "classifications")?.to_vec())
    } else {
        None
    };

    Ok(MeshAnchor {
        id,
        mesh: Mesh {
            vertices,
            normals,
            faces,
            transform,
            classification,
        },
    })
}

fn read_texture_frame(r: &mut ByteReader<'_>) -> Result<TextureFrame> {
    let id = r.array16("texture id")?;
    let timestamp = r.f64("texture timestamp")?;
    let camera_transform = r.mat4("texture transform")?;
    let intrinsics = CameraIntrinsics::from_matrix(r.mat3("texture intrinsics")?);
    let resolution = Resolution::new(r.u32("texture width")?, r.u32("texture height")?);
    let len = r.u32("image length")? as usize;
    let data = r.take(len, "image data")?.to_vec();
    Ok(TextureFrame {
        id,
        timestamp,
        camera_transform,
        intrinsics,
        image: ColorImage::new(resolution, data),
    })
}

fn read_depth_frame(r: &mut ByteReader<'_>, has_confidence: bool) -> Result<DepthCapture> {
    let id = r.array16("depth id")?;
    let timestamp = r.f64("depth timestamp")?;
    let camera_transform = r.mat4("depth transform")?;
    let intrinsics = CameraIntrinsics::from_matrix(r.mat3("depth intrinsics")?);
    let resolution = Resolution::new(r.u32("depth width")?, r.u32("depth height")?);
    let pixels = resolution.pixel_count();
    let depth = DepthMap::new(resolution, r.f32s(pixels, "depth values")?)?;
    let confidence = if has_confidence {
        let levels = r.take(pixels, "confidence values")?.to_vec();
        Some(ConfidenceMap::new(resolution, levels)?)
    } else {
        None
    };
    Ok(DepthCapture {
        id,
        timestamp,
        camera_transform,
        intrinsics,
        depth,
        confidence,
    })
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ScanMetricsError::Format(format!(
                "Truncated {what} at offset {}: need {n} bytes, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn sized(&mut self, count: usize, elem: usize, what: &str) -> Result<&'a [u8]> {
        let n = count.checked_mul(elem).ok_or_else(|| {
            ScanMetricsError::Format(format!("{what} count {count} overflows"))
        })?;
        self.take(n, what)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le(bytemuck::pod_read_unaligned(self.take(4, what)?)))
    }

    fn f64(&mut self, what: &str) -> Result<f64> {
        let bits: u64 = bytemuck::pod_read_unaligned(self.take(8, what)?);
        Ok(f64::from_bits(u64::from_le(bits)))
    }

    fn array16(&mut self, what: &str) -> Result<[u8; 16]> {
        Ok(bytemuck::pod_read_unaligned(self.take(16, what)?))
    }

    fn f32s(&mut self, count: usize, what: &str) -> Result<Vec<f32>> {
        Ok(self
            .sized(count, 4, what)?
            .chunks_exact(4)
            .map(le_f32)
            .collect())
    }

    fn vec3s(&mut self, count: usize, what: &str) -> Result<Vec<Vec3>> {
        Ok(self
            .sized(count, 12, what)?
            .chunks_exact(12)
            .map(|c| Vec3::new(le_f32(&c[0..4]), le_f32(&c[4..8]), le_f32(&c[8..12])))
            .collect())
    }

    fn u32x3s(&mut self, count: usize, what: &str) -> Result<Vec<[u32; 3]>> {
        Ok(self
            .sized(count, 12, what)?
            .chunks_exact(12)
            .map(|c| {
                let raw: [u32; 3] = bytemuck::pod_read_unaligned(c);
                raw.map(u32::from_le)
            })
            .collect())
    }

    fn mat4(&mut self, what: &str) -> Result<Mat4> {
        let cols = self.f32s(16, what)?;
        let mut m = [0.0f32; 16];
        m.copy_from_slice(&cols);
        Ok(Mat4::from_cols_array(&m))
    }

    fn mat3(&mut self, what: &str) -> Result<Mat3> {
        let cols = self.f32s(9, what)?;
        let mut m = [0.0f32; 9];
        m.copy_from_slice(&cols);
        Ok(Mat3::from_cols_array(&m))
    }
}

fn le_f32(bytes: &[u8]) -> f32 {
    let bits: u32 = bytemuck::pod_read_unaligned(bytes);
    f32::from_bits(u32::from_le(bits))
}

/// Encode a capture in LRAW layout. Flags for classifications and confidence
/// maps are derived from the data; texture and depth flags from the counts.
pub fn encode_lraw(capture: &LrawCapture) -> Vec<u8> {
    let classes = capture
        .anchors
        .iter()
        .any(|a| a.mesh.classification.is_some());
    let confidence = !capture.depth_frames.is_empty()
        && capture.depth_frames.iter().all(|d| d.confidence.is_some());

    let mut flags = 0u16;
    if classes {
        flags |= LrawFlags::HAS_CLASSIFICATIONS;
    }
    if confidence {
        flags |= LrawFlags::HAS_CONFIDENCE_MAPS;
    }
    if !capture.texture_frames.is_empty() {
        flags |= LrawFlags::HAS_TEXTURE_FRAMES;
    }
    if !capture.depth_frames.is_empty() {
        flags |= LrawFlags::HAS_DEPTH_FRAMES;
    }

    let header = RawHeader {
        magic: MAGIC,
        version: CURRENT_VERSION.to_le(),
        flags: flags.to_le(),
        anchor_count: (capture.anchors.len() as u32).to_le(),
        texture_count: (capture.texture_frames.len() as u32).to_le(),
        depth_count: (capture.depth_frames.len() as u32).to_le(),
        reserved: [0; 12],
    };
    let mut out = bytemuck::bytes_of(&header).to_vec();

    for anchor in &capture.anchors {
        let mesh = &anchor.mesh;
        let n = mesh.vertices.len();
        out.extend_from_slice(&anchor.id.0);
        put_f32s(&mut out, &mesh.transform.to_cols_array());
        out.extend_from_slice(&(n as u32).to_le_bytes());
        out.extend_from_slice(&(mesh.faces.len() as u32).to_le_bytes());
        let class = mesh.classification.as_ref().filter(|c| c.len() == n);
        out.push(u8::from(class.is_some()));
        for v in &mesh.vertices {
            put_f32s(&mut out, &v.to_array());
        }
        for i in 0..n {
            let normal = mesh.normals.get(i).copied().unwrap_or(Vec3::ZERO);
            put_f32s(&mut out, &normal.to_array());
        }
        for face in &mesh.faces {
            for idx in face {
                out.extend_from_slice(&idx.to_le_bytes());
            }
        }
        if classes && let Some(c) = class {
            out.extend_from_slice(c);
        }
    }

    for frame in &capture.texture_frames {
        out.extend_from_slice(&frame.id);
        out.extend_from_slice(&frame.timestamp.to_le_bytes());
        put_f32s(&mut out, &frame.camera_transform.to_cols_array());
        put_f32s(&mut out, &intrinsics_matrix(&frame.intrinsics).to_cols_array());
        out.extend_from_slice(&frame.image.resolution.width.to_le_bytes());
        out.extend_from_slice(&frame.image.resolution.height.to_le_bytes());
        out.extend_from_slice(&(frame.image.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&frame.image.data);
    }

    for frame in &capture.depth_frames {
        let res = frame.depth.resolution();
        out.extend_from_slice(&frame.id);
        out.extend_from_slice(&frame.timestamp.to_le_bytes());
        put_f32s(&mut out, &frame.camera_transform.to_cols_array());
        put_f32s(&mut out, &intrinsics_matrix(&frame.intrinsics).to_cols_array());
        out.extend_from_slice(&res.width.to_le_bytes());
        out.extend_from_slice(&res.height.to_le_bytes());
        put_f32s(&mut out, frame.depth.data());
        if confidence && let Some(c) = &frame.confidence {
            out.extend_from_slice(c.data());
        }
    }

    out
}

fn put_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn intrinsics_matrix(k: &CameraIntrinsics) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(k.fx, 0.0, 0.0),
        Vec3::new(0.0, k.fy, 0.0),
        Vec3::new(k.cx, k.cy, 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SurfaceClass;

    fn sample_capture() -> LrawCapture {
        let mut mesh = Mesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Z],
            vec![[0, 2, 1]],
        )
        .with_transform(Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)));
        mesh.normals = vec![Vec3::Y; 3];
        mesh.classification = Some(vec![SurfaceClass::Floor.code(); 3]);

        let k = CameraIntrinsics {
            fx: 2.0,
            fy: 2.0,
            cx: 1.0,
            cy: 1.0,
        };
        let res = Resolution::new(2, 2);
        LrawCapture {
            version: CURRENT_VERSION,
            flags: LrawFlags::default(),
            anchors: vec![MeshAnchor {
                id: AnchorId([7; 16]),
                mesh,
            }],
            texture_frames: vec![TextureFrame {
                id: [1; 16],
                timestamp: 0.5,
                camera_transform: Mat4::IDENTITY,
                intrinsics: k,
                image: ColorImage::new(res, vec![0xFF, 0xD8, 0xFF, 0x00]),
            }],
            depth_frames: vec![DepthCapture {
                id: [2; 16],
                timestamp: 0.51,
                camera_transform: Mat4::IDENTITY,
                intrinsics: k,
                depth: DepthMap::new(res, vec![1.0, 1.1, 1.2, 1.3]).unwrap(),
                confidence: Some(ConfidenceMap::new(res, vec![2, 2, 1, 0]).unwrap()),
            }],
        }
    }

    #[test]
    fn header_is_32_bytes() {
        assert_eq!(std::mem::size_of::<RawHeader>(), HEADER_LEN);
    }

    #[test]
    fn encoded_capture_decodes() {
        let bytes = encode_lraw(&sample_capture());
        let capture = parse_lraw(&bytes).unwrap();

        assert_eq!(capture.version, CURRENT_VERSION);
        assert!(capture.flags.contains(LrawFlags::HAS_CLASSIFICATIONS));
        assert!(capture.flags.contains(LrawFlags::HAS_CONFIDENCE_MAPS));
        assert!(capture.flags.contains(LrawFlags::HAS_DEPTH_FRAMES));

        let anchor = &capture.anchors[0];
        assert_eq!(anchor.id, AnchorId([7; 16]));
        assert_eq!(anchor.mesh.vertices, vec![Vec3::ZERO, Vec3::X, Vec3::Z]);
        assert_eq!(anchor.mesh.faces, vec![[0, 2, 1]]);
        assert_eq!(anchor.mesh.transform.w_axis.x, 1.0);
        assert_eq!(anchor.mesh.face_class(0), Some(SurfaceClass::Floor));

        let tex = &capture.texture_frames[0];
        assert_eq!(tex.timestamp, 0.5);
        assert_eq!(tex.intrinsics.cx, 1.0);
        assert_eq!(tex.image.encoding, crate::sync::ImageEncoding::Jpeg);

        let depth = &capture.depth_frames[0];
        assert_eq!(depth.depth.data(), &[1.0, 1.1, 1.2, 1.3]);
        assert_eq!(depth.confidence.as_ref().unwrap().data(), &[2, 2, 1, 0]);
    }

    #[test]
    fn classification_skipped_without_file_flag() {
        let mut capture = sample_capture();
        capture.anchors[0].mesh.classification = None;
        let bytes = encode_lraw(&capture);
        let decoded = parse_lraw(&bytes).unwrap();
        assert!(decoded.anchors[0].mesh.classification.is_none());
        assert!(!decoded.flags.contains(LrawFlags::HAS_CLASSIFICATIONS));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode_lraw(&sample_capture());
        bytes[0] = b'X';
        let err = parse_lraw(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn compressed_rejected() {
        let mut bytes = encode_lraw(&sample_capture());
        bytes[6] |= LrawFlags::COMPRESSED as u8;
        let err = parse_lraw(&bytes).unwrap_err();
        assert!(err.to_string().contains("Compressed"));
    }

    #[test]
    fn truncation_is_format_error() {
        let bytes = encode_lraw(&sample_capture());
        for cut in [10, HEADER_LEN + 20, bytes.len() - 1] {
            let err = parse_lraw(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, ScanMetricsError::Format(_)), "cut at {cut}");
            assert!(err.to_string().contains("Truncated"));
        }
    }

    #[test]
    fn huge_counts_do_not_allocate() {
        let mut bytes = encode_lraw(&LrawCapture::default());
        bytes[8..12].copy_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 16]);
        for _ in 0..16 {
            bytes.extend_from_slice(&0f32.to_le_bytes());
        }
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0);
        assert!(parse_lraw(&bytes).is_err());
    }

    #[test]
    fn read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.lraw");
        std::fs::write(&path, encode_lraw(&sample_capture())).unwrap();
        let capture = read_lraw(&path).unwrap();
        assert_eq!(capture.anchors.len(), 1);
        assert_eq!(capture.combined_mesh().len(), 1);

        let short = dir.path().join("short.lraw");
        std::fs::write(&short, b"LRAW").unwrap();
        assert!(matches!(read_lraw(&short), Err(ScanMetricsError::Format(_))));
        assert!(matches!(
            read_lraw(&dir.path().join("missing.lraw")),
            Err(ScanMetricsError::Input(_))
        ));
    }
}
