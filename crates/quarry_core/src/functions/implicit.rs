use crate::datatype::DataTypeId;

/// Score that should be used if no cast is needed.
pub const NO_CAST_SCORE: u32 = 800;

/// Score for a parameter declared as `Any`.
pub const ANY_SCORE: u32 = 50;

/// Return the score for casting from `have` to `want`.
///
/// Returns None if there's not a valid implicit cast. A higher score
/// indicates a more preferred cast. Only widening casts that can't lose
/// precision are allowed.
pub const fn implicit_cast_score(have: DataTypeId, want: DataTypeId) -> Option<u32> {
    if have as u8 == want as u8 {
        return Some(NO_CAST_SCORE);
    }

    match have {
        // Cast NULL to anything.
        DataTypeId::Null => Some(target_score(want)),
        DataTypeId::Int32 => match want {
            DataTypeId::Int64 | DataTypeId::Float64 | DataTypeId::Decimal => {
                Some(target_score(want))
            }
            _ => None,
        },
        DataTypeId::Int64 => match want {
            DataTypeId::Float64 | DataTypeId::Decimal => Some(target_score(want)),
            _ => None,
        },
        DataTypeId::Decimal => match want {
            DataTypeId::Float64 => Some(target_score(want)),
            _ => None,
        },
        _ => None,
    }
}

/// Determine the score for the target type we can cast to.
///
/// More "specific" types will have a higher target score.
const fn target_score(target: DataTypeId) -> u32 {
    match target {
        DataTypeId::Boolean => 200,
        DataTypeId::Int32 => 171,
        DataTypeId::Int64 => 161,
        DataTypeId::Decimal => 131,
        DataTypeId::Float64 => 121,
        DataTypeId::Timestamp => 111,
        DataTypeId::Utf8 => 1,
        _ => 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefer_narrower_target() {
        let to_i64 = implicit_cast_score(DataTypeId::Int32, DataTypeId::Int64).unwrap();
        let to_f64 = implicit_cast_score(DataTypeId::Int32, DataTypeId::Float64).unwrap();
        assert!(to_i64 > to_f64);
    }

    #[test]
    fn no_narrowing() {
        assert_eq!(None, implicit_cast_score(DataTypeId::Int64, DataTypeId::Int32));
        assert_eq!(None, implicit_cast_score(DataTypeId::Utf8, DataTypeId::Int32));
    }

    #[test]
    fn same_type_is_best() {
        assert_eq!(
            Some(NO_CAST_SCORE),
            implicit_cast_score(DataTypeId::Utf8, DataTypeId::Utf8)
        );
    }
}
