//! Per-function data slots and their operations advertisement.

use eebus_runtime::EebusError;
use eebus_wire::spine::node_management::PossibleOperations;
use eebus_wire::spine::{Command, Filter, FunctionData, FunctionType};

/// A typed data slot inside a feature.
///
/// The stored value, when present, is the authoritative local copy;
/// partial writes mutate only the selected elements.
pub struct Function {
    function_type: FunctionType,
    data: Option<FunctionData>,
    operations: Option<PossibleOperations>,
}

impl Function {
    pub fn new(function_type: FunctionType) -> Self {
        Function {
            function_type,
            data: None,
            operations: None,
        }
    }

    pub fn function_type(&self) -> FunctionType {
        self.function_type
    }

    pub fn data(&self) -> Option<&FunctionData> {
        self.data.as_ref()
    }

    pub fn data_copy(&self) -> Option<FunctionData> {
        self.data.clone()
    }

    pub fn operations(&self) -> Option<&PossibleOperations> {
        self.operations.as_ref()
    }

    pub fn set_operations(&mut self, operations: PossibleOperations) {
        self.operations = Some(operations);
    }

    /// Apply incoming data to the slot.
    ///
    /// `partial` distinguishes a merge (with optional selectors) from a
    /// full replacement; a delete filter removes matching elements first.
    pub fn update_data(
        &mut self,
        incoming: &FunctionData,
        filter_partial: Option<&Filter>,
        filter_delete: Option<&Filter>,
        partial: bool,
    ) -> Result<(), EebusError> {
        if incoming.function_type() != self.function_type {
            return Err(EebusError::InputArgument(format!(
                "data for {:?} offered to a {:?} slot",
                incoming.function_type(),
                self.function_type
            )));
        }

        if let Some(delete) = filter_delete {
            if let Some(stored) = &mut self.data {
                stored.delete_partial(Some(delete))?;
            }
        }

        if partial || filter_partial.is_some() {
            match &mut self.data {
                Some(stored) => stored.update_partial(incoming, filter_partial)?,
                None => {
                    // Nothing stored yet: seed the slot, honoring selectors.
                    let mut seeded = FunctionData::empty(self.function_type);
                    seeded.update_partial(incoming, filter_partial)?;
                    self.data = Some(seeded);
                }
            }
        } else {
            self.data = Some(incoming.clone());
        }

        Ok(())
    }

    pub fn set_data(&mut self, data: FunctionData) -> Result<(), EebusError> {
        self.update_data(&data, None, None, false)
    }

    /// The command sent in a read request for this function.
    pub fn read_cmd(&self, filter_partial: Option<Filter>) -> Command {
        let mut cmd = Command::new(FunctionData::empty(self.function_type));
        if let Some(filter) = filter_partial {
            cmd = cmd.with_partial(filter);
        }
        cmd
    }

    /// The command sent in a reply, carrying the stored data (or an empty
    /// value when nothing is stored yet).
    pub fn reply_cmd(&self) -> Command {
        Command::new(
            self.data
                .clone()
                .unwrap_or_else(|| FunctionData::empty(self.function_type)),
        )
    }

    /// The command composed for notifies and writes, restricted by the
    /// filters that triggered the change.
    pub fn write_cmd(
        &self,
        filter_partial: Option<Filter>,
        filter_delete: Option<Filter>,
    ) -> Command {
        let mut cmd = Command::new(
            self.data
                .clone()
                .unwrap_or_else(|| FunctionData::empty(self.function_type)),
        );
        if let Some(filter) = filter_partial {
            cmd = cmd.with_partial(filter);
        }
        if let Some(filter) = filter_delete {
            cmd = cmd.with_delete(filter);
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eebus_wire::spine::{LoadControlLimit, LoadControlLimitListData, ScaledNumber};

    fn list(limits: Vec<(u32, i64)>) -> FunctionData {
        FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: limits
                .into_iter()
                .map(|(id, number)| LoadControlLimit {
                    limit_id: id,
                    value: Some(ScaledNumber::new(number)),
                    ..Default::default()
                })
                .collect(),
        })
    }

    #[test]
    fn full_update_replaces_stored_data() {
        let mut function = Function::new(FunctionType::LoadControlLimitListData);
        function.set_data(list(vec![(1, 100)])).unwrap();
        function
            .update_data(&list(vec![(2, 200)]), None, None, false)
            .unwrap();

        match function.data().unwrap() {
            FunctionData::LoadControlLimitListData(d) => {
                assert_eq!(d.limits.len(), 1);
                assert_eq!(d.limits[0].limit_id, 2);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn partial_update_merges_into_stored_data() {
        let mut function = Function::new(FunctionType::LoadControlLimitListData);
        function.set_data(list(vec![(1, 100)])).unwrap();
        function
            .update_data(&list(vec![(2, 200)]), None, None, true)
            .unwrap();

        match function.data().unwrap() {
            FunctionData::LoadControlLimitListData(d) => assert_eq!(d.limits.len(), 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let mut function = Function::new(FunctionType::MeasurementListData);
        assert!(function.set_data(list(vec![(1, 100)])).is_err());
    }

    #[test]
    fn reply_cmd_of_empty_slot_is_an_empty_value() {
        let function = Function::new(FunctionType::LoadControlLimitListData);
        let cmd = function.reply_cmd();
        assert_eq!(
            cmd.function.function_type(),
            FunctionType::LoadControlLimitListData
        );
    }
}
