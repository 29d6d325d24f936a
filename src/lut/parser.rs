use super::cube::ColorCube;
use crate::error::LutError;
use std::path::Path;
use tracing::debug;

const MIN_SIZE: usize = 2;
const MAX_SIZE: usize = 256;

/// Text encodings of a 3D LUT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutFormat {
    /// Resolve/Adobe `.cube`
    Cube,
    /// Autodesk/Lustre `.3dl`
    ThreeDl,
}

impl LutFormat {
    /// Guess from the extension, falling back to sniffing the contents
    pub fn detect(path: &Path, contents: &str) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("cube") => LutFormat::Cube,
            Some("3dl") => LutFormat::ThreeDl,
            _ if contents.contains("LUT_3D_SIZE") || contents.contains("LUT_1D_SIZE") => {
                LutFormat::Cube
            }
            _ => LutFormat::ThreeDl,
        }
    }
}

pub fn parse(format: LutFormat, contents: &str) -> Result<ColorCube, LutError> {
    match format {
        LutFormat::Cube => parse_cube(contents),
        LutFormat::ThreeDl => parse_3dl(contents),
    }
}

fn check_size(size: usize) -> Result<usize, LutError> {
    if (MIN_SIZE..=MAX_SIZE).contains(&size) {
        Ok(size)
    } else {
        Err(LutError::InvalidDimension { size })
    }
}

fn parse_floats<const N: usize>(
    tokens: &[&str],
    line: usize,
) -> Result<[f32; N], LutError> {
    if tokens.len() != N {
        return Err(LutError::Malformed {
            line,
            details: format!("expected {} values, found {}", N, tokens.len()),
        });
    }
    let mut values = [0.0f32; N];
    for (slot, token) in values.iter_mut().zip(tokens) {
        let value: f32 = token.parse().map_err(|_| LutError::Malformed {
            line,
            details: format!("'{}' is not a number", token),
        })?;
        if !value.is_finite() {
            return Err(LutError::Malformed {
                line,
                details: format!("'{}' is not finite", token),
            });
        }
        *slot = value;
    }
    Ok(values)
}

/// Parse a `.cube` file. Data rows are red-fastest, which is also the
/// in-memory order of [`ColorCube`].
pub fn parse_cube(contents: &str) -> Result<ColorCube, LutError> {
    let mut size: Option<usize> = None;
    let mut title = None;
    let mut domain_min = [0.0f32; 3];
    let mut domain_max = [1.0f32; 3];
    let mut nodes: Vec<[f32; 3]> = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "TITLE" => {
                let text = line["TITLE".len()..].trim().trim_matches('"');
                title = Some(text.to_string());
            }
            "LUT_3D_SIZE" => {
                let [value] = parse_floats::<1>(&tokens[1..], line_number)?;
                size = Some(check_size(value as usize)?);
            }
            "LUT_1D_SIZE" => {
                return Err(LutError::UnsupportedFormat {
                    details: "1D LUTs are not supported".to_string(),
                });
            }
            "DOMAIN_MIN" => domain_min = parse_floats::<3>(&tokens[1..], line_number)?,
            "DOMAIN_MAX" => domain_max = parse_floats::<3>(&tokens[1..], line_number)?,
            "LUT_3D_INPUT_RANGE" => {
                let [min, max] = parse_floats::<2>(&tokens[1..], line_number)?;
                domain_min = [min; 3];
                domain_max = [max; 3];
            }
            keyword if keyword.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) => {
                debug!("Ignoring .cube keyword '{}' on line {}", keyword, line_number);
            }
            _ => {
                if size.is_none() {
                    return Err(LutError::MissingDimension);
                }
                nodes.push(parse_floats::<3>(&tokens, line_number)?);
            }
        }
    }

    let size = size.ok_or(LutError::MissingDimension)?;
    let expected = size * size * size;
    if nodes.len() != expected {
        return Err(LutError::TripleCount {
            expected,
            found: nodes.len(),
        });
    }

    Ok(ColorCube::from_nodes(size, nodes)
        .with_domain(domain_min, domain_max)
        .with_title(title))
}

/// Parse a `.3dl` file.
///
/// An optional first row lists the input mesh (N integers). Data rows are
/// blue-fastest integer triples scaled to the output bit depth, which is
/// inferred from the largest value.
pub fn parse_3dl(contents: &str) -> Result<ColorCube, LutError> {
    let mut mesh_size: Option<usize> = None;
    let mut rows: Vec<[f32; 3]> = Vec::new();
    let mut float_values = false;

    for (index, raw) in contents.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens[0].chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            debug!("Ignoring .3dl keyword '{}' on line {}", tokens[0], line_number);
            continue;
        }

        if tokens.len() != 3 {
            if rows.is_empty() && mesh_size.is_none() {
                mesh_size = Some(check_size(tokens.len())?);
                continue;
            }
            return Err(LutError::Malformed {
                line: line_number,
                details: format!("expected 3 values, found {}", tokens.len()),
            });
        }

        float_values |= tokens.iter().any(|token| token.contains('.'));
        rows.push(parse_floats::<3>(&tokens, line_number)?);
    }

    // A three-point mesh header has the same shape as a data row. It is told
    // apart by the row count and by its values rising from zero.
    if mesh_size.is_none() && rows.len() == 28 && is_mesh_row(&rows[0]) {
        rows.remove(0);
        mesh_size = Some(3);
    }

    let size = match mesh_size {
        Some(size) => size,
        None => {
            let root = (rows.len() as f64).cbrt().round() as usize;
            if root * root * root != rows.len() {
                return Err(LutError::TripleCount {
                    expected: root * root * root,
                    found: rows.len(),
                });
            }
            check_size(root)?
        }
    };

    let expected = size * size * size;
    if rows.len() != expected {
        return Err(LutError::TripleCount {
            expected,
            found: rows.len(),
        });
    }

    let scale = if float_values {
        1.0
    } else {
        let peak = rows
            .iter()
            .flat_map(|row| row.iter().copied())
            .fold(0.0f32, f32::max);
        match peak {
            p if p <= 1_023.0 => 1_023.0,
            p if p <= 4_095.0 => 4_095.0,
            _ => 65_535.0,
        }
    };

    let mut nodes = vec![[0.0f32; 3]; expected];
    for (index, row) in rows.iter().enumerate() {
        let r = index / (size * size);
        let g = (index / size) % size;
        let b = index % size;
        nodes[r + g * size + b * size * size] = [row[0] / scale, row[1] / scale, row[2] / scale];
    }

    Ok(ColorCube::from_nodes(size, nodes))
}

fn is_mesh_row(row: &[f32; 3]) -> bool {
    row[0] == 0.0 && row[0] < row[1] && row[1] < row[2]
}
