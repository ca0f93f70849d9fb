use crate::{Error, Result, SequenceConfig};

const LETTERS: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Returns the letter run used at `overflow_position`.
///
/// Letters are assigned by position index (`A`, `AB`, `ABC`, ...), not by
/// base-26 counting. Past 26 positions the alphabet repeats.
pub fn overflow_letters(overflow_position: u32) -> String {
    (0..overflow_position)
        .map(|i| LETTERS[(i % 26) as usize] as char)
        .collect()
}

/// Formats the numeric (or lettered) component of an ID.
///
/// Without overflow the value is zero-padded to `padding_length` digits.
/// With overflow, `overflow_position` letters are followed by the value
/// zero-padded to the remaining width.
///
/// ```
/// use seqid::format_component;
///
/// assert_eq!(format_component(42, 6, 0), "000042");
/// assert_eq!(format_component(7, 4, 1), "A007");
/// assert_eq!(format_component(7, 4, 2), "AB07");
/// ```
pub fn format_component(value: u64, padding_length: u32, overflow_position: u32) -> String {
    let width = padding_length.saturating_sub(overflow_position) as usize;
    let mut out = overflow_letters(overflow_position);
    out.push_str(&format!("{value:0width$}"));
    out
}

/// Numeric capacity of one day at `padding_length` digits.
pub fn capacity(padding_length: u32) -> Option<u64> {
    10u64.checked_pow(padding_length)
}

/// A batch of IDs minted from a [`SequenceConfig`] and the cursor state that
/// must be persisted afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintedBatch {
    /// IDs in increasing cursor order.
    pub ids: Vec<String>,
    pub next_cursor: u64,
    pub next_overflow: u32,
}

/// Mints `config.batch_size` IDs starting at `config.current_cursor`.
///
/// After minting, the cursor advances by the batch size. If that would pass
/// the day's numeric capacity the cursor wraps to 1 and one more letter slot
/// is opened instead, so the day keeps producing IDs rather than failing.
pub fn mint_batch(config: &SequenceConfig, today: &str) -> Result<MintedBatch> {
    let overflow = || Error::CursorOverflow(config.key.clone());
    let batch_size = u64::from(config.batch_size);
    let end = config
        .current_cursor
        .checked_add(batch_size)
        .ok_or_else(overflow)?;

    let ids = (config.current_cursor..end)
        .map(|value| {
            let mut id = String::with_capacity(
                config.prefix.len() + today.len() + config.padding_length as usize + 1,
            );
            id.push_str(&config.prefix);
            id.push_str(today);
            id.push_str(&format_component(
                value,
                config.padding_length,
                config.overflow_position,
            ));
            id
        })
        .collect();

    let capacity = capacity(config.padding_length).ok_or_else(overflow)?;
    let (next_cursor, next_overflow) = if end > capacity {
        let next_overflow = config.overflow_position.checked_add(1).ok_or_else(overflow)?;
        (1, next_overflow)
    } else {
        (end, config.overflow_position)
    };

    Ok(MintedBatch {
        ids,
        next_cursor,
        next_overflow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(padding_length: u32, batch_size: u32, cursor: u64, overflow: u32) -> SequenceConfig {
        SequenceConfig {
            key: "order".into(),
            prefix: "ORD".into(),
            date_format: "yyyyMMdd".into(),
            padding_length,
            batch_size,
            current_cursor: cursor,
            overflow_position: overflow,
            last_rollover_date: "20250617".into(),
        }
    }

    #[test]
    fn letters_follow_position_index() {
        assert_eq!(overflow_letters(0), "");
        assert_eq!(overflow_letters(1), "A");
        assert_eq!(overflow_letters(3), "ABC");
        assert_eq!(overflow_letters(28), format!("{}AB", "ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
    }

    #[test]
    fn component_widths() {
        assert_eq!(format_component(1, 6, 0), "000001");
        assert_eq!(format_component(1234567, 6, 0), "1234567");
        assert_eq!(format_component(1, 2, 1), "A1");
        assert_eq!(format_component(12, 2, 2), "AB12");
        assert_eq!(format_component(5, 2, 3), "ABC5");
    }

    #[test]
    fn mint_advances_cursor() {
        let batch = mint_batch(&config(6, 3, 1, 0), "20250617").unwrap();
        assert_eq!(
            batch.ids,
            ["ORD20250617000001", "ORD20250617000002", "ORD20250617000003"]
        );
        assert_eq!(batch.next_cursor, 4);
        assert_eq!(batch.next_overflow, 0);
    }

    #[test]
    fn mint_wraps_into_overflow_when_capacity_is_passed() {
        // 51 + 50 = 101 > 10^2
        let batch = mint_batch(&config(2, 50, 51, 0), "20250617").unwrap();
        assert_eq!(batch.ids.first().unwrap(), "ORD2025061751");
        assert_eq!(batch.next_cursor, 1);
        assert_eq!(batch.next_overflow, 1);

        let lettered = mint_batch(&config(2, 50, 1, 1), "20250617").unwrap();
        assert_eq!(lettered.ids.first().unwrap(), "ORD20250617A1");
        assert_eq!(lettered.next_cursor, 51);
        assert_eq!(lettered.next_overflow, 1);
    }

    #[test]
    fn mint_exactly_at_capacity_does_not_wrap() {
        // 1 + 99 = 100 == 10^2
        let batch = mint_batch(&config(2, 99, 1, 0), "").unwrap();
        assert_eq!(batch.ids.last().unwrap(), "ORD99");
        assert_eq!(batch.next_cursor, 100);
        assert_eq!(batch.next_overflow, 0);
    }

    #[test]
    fn mint_reports_cursor_overflow() {
        let err = mint_batch(&config(6, 10, u64::MAX - 2, 0), "").unwrap_err();
        assert!(matches!(err, Error::CursorOverflow(key) if key == "order"));
    }
}
