use crate::protocol::BmsCommand;

/// Selects the request sent on `tick` (ticks count from 1).
///
/// Every third tick reads the start-voltage register. Of the rest, even
/// ticks request pack info and odd ticks request cell voltages. The register
/// read wins when both rules apply.
///
/// ```
/// use bmspoll::{BmsCommand, command_for_tick};
///
/// assert_eq!(BmsCommand::CellVoltages, command_for_tick(1));
/// assert_eq!(BmsCommand::PackInfo, command_for_tick(2));
/// assert_eq!(BmsCommand::START_VOLTAGE, command_for_tick(6));
/// ```
#[must_use]
pub fn command_for_tick(tick: u32) -> BmsCommand {
    if tick.is_multiple_of(3) {
        BmsCommand::START_VOLTAGE
    } else if tick.is_multiple_of(2) {
        BmsCommand::PackInfo
    } else {
        BmsCommand::CellVoltages
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn first_six_ticks_cover_every_command() {
        let sequence: Vec<BmsCommand> = (1..=6).map(command_for_tick).collect();

        // Tick 4 is pack info and tick 5 is cell voltages. A sequence that
        // repeats cell, pack, register does not follow from the modulo rule.

        assert_eq!(
            vec![
                BmsCommand::CellVoltages,
                BmsCommand::PackInfo,
                BmsCommand::START_VOLTAGE,
                BmsCommand::PackInfo,
                BmsCommand::CellVoltages,
                BmsCommand::START_VOLTAGE,
            ],
            sequence
        );
    }

    #[rstest]
    #[case(4, BmsCommand::PackInfo)]
    #[case(5, BmsCommand::CellVoltages)]
    #[case(7, BmsCommand::CellVoltages)]
    fn ticks_after_the_first_register_read_follow_parity(
        #[case] tick: u32,
        #[case] expected: BmsCommand,
    ) {
        assert_eq!(expected, command_for_tick(tick));
    }

    #[rstest]
    #[case(12)]
    #[case(18)]
    #[case(30)]
    fn register_read_takes_priority_over_pack_info(#[case] tick: u32) {
        assert_eq!(BmsCommand::START_VOLTAGE, command_for_tick(tick));
    }
}
