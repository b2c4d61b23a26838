//! Streaming Gaussian-splat PLY output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use super::assemble::ScenePoint;
use crate::error::SceneWriteError;

/// Highest spherical-harmonic degree a sink accepts.
pub const MAX_SH_DEGREE: u8 = 3;

/// Append-only destination for scene points.
///
/// The point count is declared up front; `close` fails if a different number
/// of points was written.
pub trait SceneSink: Send {
    /// Begin a scene of `expected_points` points.
    fn start(&mut self, sh_degree: u8, binary: bool, expected_points: usize) -> Result<(), SceneWriteError>;

    /// Append a batch, preserving order.
    fn write(&mut self, batch: Vec<ScenePoint>) -> Result<(), SceneWriteError>;

    /// Finish the scene and flush.
    fn close(&mut self) -> Result<(), SceneWriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Started {
        sh_degree: u8,
        binary: bool,
        expected: usize,
        written: usize,
    },
    Closed,
}

/// Writes the 3D Gaussian splatting PLY layout.
///
/// Vertex properties are `x y z f_dc_0..2 f_rest_* opacity scale_0..2
/// rot_0..3`. Opacity is stored as a logit and scale as a natural log.
/// Higher-order harmonic coefficients are written as zero.
pub struct PlyWriter<W: Write> {
    out: W,
    state: WriterState,
}

impl PlyWriter<BufWriter<File>> {
    /// Create (or truncate) a PLY file at `path`.
    pub fn create(path: &Path) -> Result<Self, SceneWriteError> {
        let file = File::create(path)?;
        debug!("Writing scene to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> PlyWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            state: WriterState::Created,
        }
    }

    /// Consume the writer, returning the underlying output.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self, sh_degree: u8, binary: bool, count: usize) -> std::io::Result<()> {
        let format = if binary {
            "binary_little_endian"
        } else {
            "ascii"
        };

        writeln!(self.out, "ply")?;
        writeln!(self.out, "format {format} 1.0")?;
        writeln!(self.out, "element vertex {count}")?;
        for name in ["x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2"] {
            writeln!(self.out, "property float {name}")?;
        }
        for i in 0..rest_coefficients(sh_degree) {
            writeln!(self.out, "property float f_rest_{i}")?;
        }
        for name in [
            "opacity", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        ] {
            writeln!(self.out, "property float {name}")?;
        }
        writeln!(self.out, "end_header")
    }

    fn write_point(&mut self, point: &ScenePoint, rest: usize, binary: bool) -> std::io::Result<()> {
        let opacity = logit(point.opacity);
        let scale = point.scale.map(f32::ln);

        let values = point
            .position
            .iter()
            .chain(&point.sh_dc)
            .chain(std::iter::repeat_n(&0.0f32, rest))
            .chain(std::iter::once(&opacity))
            .chain(&scale)
            .chain(&point.rotation);

        if binary {
            for &v in values {
                self.out.write_f32::<LittleEndian>(v)?;
            }
        } else {
            let line: Vec<String> = values.map(|v| v.to_string()).collect();
            writeln!(self.out, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

impl<W: Write + Send> SceneSink for PlyWriter<W> {
    fn start(&mut self, sh_degree: u8, binary: bool, expected_points: usize) -> Result<(), SceneWriteError> {
        if self.state != WriterState::Created {
            return Err(SceneWriteError::InvalidState("start called twice"));
        }
        if sh_degree > MAX_SH_DEGREE {
            return Err(SceneWriteError::UnsupportedDegree(sh_degree));
        }

        self.write_header(sh_degree, binary, expected_points)?;
        self.state = WriterState::Started {
            sh_degree,
            binary,
            expected: expected_points,
            written: 0,
        };
        Ok(())
    }

    fn write(&mut self, batch: Vec<ScenePoint>) -> Result<(), SceneWriteError> {
        let WriterState::Started {
            sh_degree,
            binary,
            expected,
            written,
        } = self.state
        else {
            return Err(SceneWriteError::InvalidState(match self.state {
                WriterState::Closed => "write after close",
                _ => "write before start",
            }));
        };

        let total = written + batch.len();
        if total > expected {
            return Err(SceneWriteError::CountMismatch {
                expected,
                written: total,
            });
        }

        let rest = rest_coefficients(sh_degree);
        for point in &batch {
            self.write_point(point, rest, binary)?;
        }

        self.state = WriterState::Started {
            sh_degree,
            binary,
            expected,
            written: total,
        };
        Ok(())
    }

    fn close(&mut self) -> Result<(), SceneWriteError> {
        let WriterState::Started {
            expected, written, ..
        } = self.state
        else {
            return Err(SceneWriteError::InvalidState("close without start"));
        };

        self.state = WriterState::Closed;
        self.out.flush()?;

        if written != expected {
            return Err(SceneWriteError::CountMismatch { expected, written });
        }
        debug!("Scene closed with {} points", written);
        Ok(())
    }
}

/// Number of `f_rest_*` properties for a harmonic degree.
pub fn rest_coefficients(sh_degree: u8) -> usize {
    let per_channel = (usize::from(sh_degree) + 1).pow(2);
    3 * (per_channel - 1)
}

fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn point(z: f32) -> ScenePoint {
        ScenePoint {
            position: [1.0, 2.0, z],
            sh_dc: [0.1, 0.2, 0.3],
            opacity: 0.5,
            scale: [1.0, 1.0, 1.0],
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }

    fn split_header(bytes: &[u8]) -> (String, &[u8]) {
        let needle = b"end_header\n";
        let pos = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        let end = pos + needle.len();
        (String::from_utf8(bytes[..end].to_vec()).unwrap(), &bytes[end..])
    }

    #[test]
    fn test_binary_layout() {
        let mut writer = PlyWriter::new(Vec::new());
        writer.start(0, true, 2).unwrap();
        writer.write(vec![point(3.0)]).unwrap();
        writer.write(vec![point(4.0)]).unwrap();
        writer.close().unwrap();

        let bytes = writer.into_inner();
        let (header, body) = split_header(&bytes);

        assert!(header.starts_with("ply\nformat binary_little_endian 1.0\nelement vertex 2\n"));
        assert!(!header.contains("f_rest"));
        assert_eq!(body.len(), 2 * 14 * 4);

        let mut cursor = Cursor::new(body);
        let first: Vec<f32> = (0..14)
            .map(|_| cursor.read_f32::<LittleEndian>().unwrap())
            .collect();
        assert_eq!(
            first,
            vec![1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
        );
        let second_z = {
            cursor.set_position(14 * 4 + 8);
            cursor.read_f32::<LittleEndian>().unwrap()
        };
        assert_eq!(second_z, 4.0);
    }

    #[test]
    fn test_ascii_with_higher_degree() {
        let mut writer = PlyWriter::new(Vec::new());
        writer.start(1, false, 1).unwrap();
        writer.write(vec![point(3.0)]).unwrap();
        writer.close().unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.contains("format ascii 1.0"));
        assert!(text.contains("property float f_rest_8\n"));
        assert!(!text.contains("f_rest_9"));

        let line = text.lines().last().unwrap();
        assert_eq!(line.split(' ').count(), 14 + 9);
        assert!(line.starts_with("1 2 3 0.1 0.2 0.3 0 0"));
    }

    #[test]
    fn test_rest_coefficients() {
        assert_eq!(rest_coefficients(0), 0);
        assert_eq!(rest_coefficients(1), 9);
        assert_eq!(rest_coefficients(2), 24);
        assert_eq!(rest_coefficients(3), 45);
    }

    #[test]
    fn test_count_validated_on_close() {
        let mut writer = PlyWriter::new(Vec::new());
        writer.start(0, true, 3).unwrap();
        writer.write(vec![point(0.0)]).unwrap();
        assert!(matches!(
            writer.close(),
            Err(SceneWriteError::CountMismatch {
                expected: 3,
                written: 1
            })
        ));
    }

    #[test]
    fn test_overflowing_batch_rejected() {
        let mut writer = PlyWriter::new(Vec::new());
        writer.start(0, true, 1).unwrap();
        let err = writer.write(vec![point(0.0), point(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            SceneWriteError::CountMismatch {
                expected: 1,
                written: 2
            }
        ));
    }

    #[test]
    fn test_state_checks() {
        let mut writer = PlyWriter::new(Vec::new());
        assert!(matches!(
            writer.write(vec![point(0.0)]),
            Err(SceneWriteError::InvalidState("write before start"))
        ));

        writer.start(0, true, 0).unwrap();
        assert!(matches!(
            writer.start(0, true, 0),
            Err(SceneWriteError::InvalidState(_))
        ));
        writer.close().unwrap();
        assert!(matches!(
            writer.write(Vec::new()),
            Err(SceneWriteError::InvalidState("write after close"))
        ));
    }

    #[test]
    fn test_unsupported_degree() {
        let mut writer = PlyWriter::new(Vec::new());
        assert!(matches!(
            writer.start(4, true, 0),
            Err(SceneWriteError::UnsupportedDegree(4))
        ));
    }

    #[test]
    fn test_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.ply");

        let mut writer = PlyWriter::create(&path).unwrap();
        writer.start(0, true, 1).unwrap();
        writer.write(vec![point(2.0)]).unwrap();
        writer.close().unwrap();
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        let (_, body) = split_header(&bytes);
        assert_eq!(body.len(), 14 * 4);
    }
}
