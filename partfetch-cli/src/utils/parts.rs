use partfetch_engine::Part;

use super::parse_size;
use crate::error::AppError;

/// Parse an `OFFSET:LENGTH` argument; both sides accept size units
pub fn parse_part(part_str: &str) -> Result<Part, AppError> {
    let (offset, length) = part_str.split_once(':').ok_or_else(|| {
        AppError::InvalidInput(format!(
            "Invalid part '{part_str}'. Expected 'OFFSET:LENGTH'"
        ))
    })?;

    let offset = parse_size(offset)?;
    let length = parse_size(length)?;
    if length == 0 {
        return Err(AppError::InvalidInput(format!(
            "Part '{part_str}' has zero length"
        )));
    }

    Ok(Part::new(offset, length))
}
