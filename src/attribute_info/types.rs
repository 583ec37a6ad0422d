use std::collections::BTreeMap;

use crate::code_attribute::Label;

/// One row of a method's exception table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start: Label,
    /// Exclusive end of the protected range.
    pub end: Label,
    pub handler: Label,
    /// Internal name of the caught class; `None` catches everything.
    pub catch_type: Option<String>,
    /// Slot the handler stores the exception into, when the reader knows it.
    pub local: Option<u16>,
}

/// One live range of a local variable slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub index: u16,
    pub name: String,
    pub descriptor: String,
    pub start: Label,
    /// Exclusive end of the scope.
    pub end: Label,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalVariableTable {
    pub items: Vec<LocalVariable>,
}

impl LocalVariableTable {
    pub fn new(items: Vec<LocalVariable>) -> Self {
        Self { items }
    }

    /// The instance of `slot` whose scope covers instruction `index`.
    pub fn instance_at(
        &self,
        slot: u16,
        index: usize,
        positions: &BTreeMap<Label, usize>,
    ) -> Option<&LocalVariable> {
        self.items.iter().find(|item| {
            if item.index != slot {
                return false;
            }
            match (positions.get(&item.start), positions.get(&item.end)) {
                (Some(&start), Some(&end)) => start <= index && index < end,
                _ => false,
            }
        })
    }

    /// The instance whose scope opens at `label`, optionally filtered by
    /// descriptor. Used to match a catch clause's bound local.
    pub fn instance_for_label(&self, label: Label, descriptor: Option<&str>) -> Option<&LocalVariable> {
        self.items.iter().find(|item| {
            item.start == label && descriptor.map_or(true, |d| item.descriptor == d)
        })
    }
}

/// Internal class name (`java/io/IOException`) to a field descriptor.
pub fn class_descriptor(internal_name: &str) -> String {
    format!("L{};", internal_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (LocalVariableTable, BTreeMap<Label, usize>) {
        let items = vec![
            LocalVariable {
                index: 1,
                name: "i".into(),
                descriptor: "I".into(),
                start: Label(0),
                end: Label(1),
            },
            LocalVariable {
                index: 1,
                name: "e".into(),
                descriptor: "Ljava/io/IOException;".into(),
                start: Label(2),
                end: Label(3),
            },
        ];
        let positions = [(Label(0), 0), (Label(1), 10), (Label(2), 12), (Label(3), 20)]
            .into_iter()
            .collect();
        (LocalVariableTable::new(items), positions)
    }

    #[test]
    fn slot_lookup_respects_scope() {
        let (lvt, positions) = table();
        assert_eq!(lvt.instance_at(1, 4, &positions).map(|v| v.name.as_str()), Some("i"));
        assert_eq!(lvt.instance_at(1, 15, &positions).map(|v| v.name.as_str()), Some("e"));
        assert!(lvt.instance_at(1, 10, &positions).is_none());
        assert!(lvt.instance_at(2, 4, &positions).is_none());
    }

    #[test]
    fn label_lookup_filters_by_descriptor() {
        let (lvt, _) = table();
        let io = class_descriptor("java/io/IOException");
        assert_eq!(lvt.instance_for_label(Label(2), Some(&io)).map(|v| v.index), Some(1));
        assert!(lvt.instance_for_label(Label(2), Some("I")).is_none());
        assert!(lvt.instance_for_label(Label(2), None).is_some());
    }
}
