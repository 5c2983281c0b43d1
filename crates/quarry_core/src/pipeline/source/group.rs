//! `$group`: partition documents by key and accumulate each partition.

use super::{attach, dispose_upstream, stage_document, upstream};
use super::{DocumentSource, StageSplit, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::accumulator::{Accumulator, AccumulatorOp};
use crate::pipeline::expression::{parse_operand, Expression, FieldPath};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, OrderedValue, Value};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};

/// One output field: `name: {op: expression}`.
#[derive(Debug, Clone)]
struct AccumulatedField {
    name: String,
    op: AccumulatorOp,
    operand: Expression,
}

/// Groups the whole input on the first pull, then yields one document per
/// group in order of first appearance.
#[derive(Debug)]
pub struct GroupSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    id: Expression,
    fields: Vec<AccumulatedField>,
    merging: bool,
    output: Option<VecDeque<Document>>,
}

impl GroupSource {
    /// Stage name.
    pub const NAME: &'static str = "$group";

    /// Parses `{$group: {_id: <expr>, <field>: {<accumulator>: <expr>}, ...}}`.
    ///
    /// When the context is merging, array accumulators splice their inputs.
    ///
    /// # Errors
    ///
    /// Code 15947 if the argument is not an object, 15955 without `_id`,
    /// 15950 and 16414 for bad field names, 15951, 15954 and 15952 for bad
    /// accumulator specifications.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let Some(spec) = spec.as_document() else {
            return Err(CoreError::user(15947, "a group's fields must be specified in an object"));
        };

        let mut id = None;
        let mut fields = Vec::new();
        for (name, value) in spec.iter() {
            if name == "_id" {
                id = Some(parse_operand(value)?);
                continue;
            }
            if name.starts_with('$') {
                return Err(CoreError::user(
                    15950,
                    format!("the group aggregate field name '{name}' cannot be an operator name"),
                ));
            }
            if name.contains('.') {
                return Err(CoreError::user(
                    16414,
                    format!("the group aggregate field name '{name}' cannot contain '.'"),
                ));
            }
            let Some(accumulator) = value.as_document() else {
                return Err(CoreError::user(
                    15951,
                    format!("the group aggregate field '{name}' must be defined as an expression inside an object"),
                ));
            };
            let (op_name, operand) = match accumulator.first() {
                Some(first) if accumulator.len() == 1 => first,
                _ => {
                    return Err(CoreError::user(
                        15954,
                        format!("the computed aggregate '{name}' must specify exactly one operator"),
                    ))
                }
            };
            let Some(op) = AccumulatorOp::lookup(op_name) else {
                return Err(CoreError::user(15952, format!("unknown group operator '{op_name}'")));
            };
            fields.push(AccumulatedField {
                name: name.to_string(),
                op,
                operand: parse_operand(operand)?,
            });
        }

        let Some(id) = id else {
            return Err(CoreError::user(15955, "a group specification must include an _id"));
        };
        Ok(Box::new(Self::new(id, fields, ctx.clone(), ctx.doing_merge())))
    }

    fn new(id: Expression, fields: Vec<AccumulatedField>, ctx: ExpressionContext, merging: bool) -> Self {
        Self {
            ctx,
            state: StageState::default(),
            source: None,
            id,
            fields,
            merging,
            output: None,
        }
    }

    /// Returns true if accumulators combine partial results.
    #[must_use]
    pub fn is_merging(&self) -> bool {
        self.merging
    }

    fn populate(&mut self) -> CoreResult<VecDeque<Document>> {
        let mut index: BTreeMap<OrderedValue, usize> = BTreeMap::new();
        let mut groups: Vec<(Value, Vec<Box<dyn Accumulator>>)> = Vec::new();
        let source = upstream(Self::NAME, &mut self.source)?;

        while let Some(doc) = source.next_document()? {
            let mut key = self.id.evaluate(&doc)?;
            if key.is_undefined() {
                key = Value::Null;
            }
            let slot = match index.get(&OrderedValue(key.clone())) {
                Some(&slot) => slot,
                None => {
                    let accumulators = self.fields.iter().map(|f| f.op.create(self.merging)).collect();
                    groups.push((key.clone(), accumulators));
                    index.insert(OrderedValue(key), groups.len() - 1);
                    groups.len() - 1
                }
            };
            let accumulators = &mut groups[slot].1;
            for (field, accumulator) in self.fields.iter().zip(accumulators.iter_mut()) {
                accumulator.process(&field.operand.evaluate(&doc)?)?;
            }
        }

        let mut output = VecDeque::with_capacity(groups.len());
        for (key, accumulators) in groups {
            let mut doc = Document::with_capacity(self.fields.len() + 1);
            doc.insert("_id", key);
            for (field, accumulator) in self.fields.iter().zip(&accumulators) {
                let value = accumulator.value();
                if !value.is_undefined() {
                    doc.insert(field.name.as_str(), value);
                }
            }
            output.push_back(doc);
        }
        tracing::debug!(groups = output.len(), merging = self.merging, "grouped input");
        Ok(output)
    }
}

impl DocumentSource for GroupSource {
    fn source_name(&self) -> &'static str {
        Self::NAME
    }

    fn context(&self) -> &ExpressionContext {
        &self.ctx
    }

    fn state(&mut self) -> &mut StageState {
        &mut self.state
    }

    fn fetch(&mut self) -> CoreResult<Option<Document>> {
        if self.output.is_none() {
            self.output = Some(self.populate()?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn optimize(&mut self) -> CoreResult<()> {
        let id = std::mem::replace(&mut self.id, Expression::Constant(Value::Null));
        self.id = id.optimize()?;
        for field in &mut self.fields {
            let operand = std::mem::replace(&mut field.operand, Expression::Constant(Value::Null));
            field.operand = operand.optimize()?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.output = None;
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        let mut spec = Document::with_capacity(self.fields.len() + 1);
        spec.insert("_id", self.id.serialize(false));
        for field in &self.fields {
            spec.insert(
                field.name.as_str(),
                Document::new().with(field.op.name(), field.operand.serialize(false)),
            );
        }
        stage_document(Self::NAME, spec)
    }

    /// The shard half groups as declared; the merge half regroups on `_id`
    /// and folds each partial field with the same accumulator.
    fn split(&self) -> Option<StageSplit> {
        let shard = Self::new(self.id.clone(), self.fields.clone(), self.ctx.clone(), self.merging);
        let merge_fields = self
            .fields
            .iter()
            .map(|field| AccumulatedField {
                name: field.name.clone(),
                op: field.op,
                operand: Expression::FieldPath(FieldPath::from_segment(&field.name)),
            })
            .collect();
        let merge = Self::new(
            Expression::FieldPath(FieldPath::from_segment("_id")),
            merge_fields,
            self.ctx.clone().with_doing_merge(true),
            true,
        );
        Some(StageSplit {
            shard: Some(Box::new(shard)),
            merge: Some(Box::new(merge)),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::ArraySource;

    fn group(spec: &str, docs: &[&str]) -> Vec<String> {
        let ctx = ExpressionContext::detached();
        let mut stage = GroupSource::parse(&Value::from_json_str(spec).unwrap(), &ctx).unwrap();
        stage.optimize().unwrap();
        run(stage, docs)
    }

    fn run(mut stage: Box<dyn DocumentSource>, docs: &[&str]) -> Vec<String> {
        let docs = docs.iter().map(|d| Document::from_json_str(d).unwrap()).collect();
        stage
            .set_source(Box::new(ArraySource::new(docs, ExpressionContext::detached())))
            .unwrap();
        let mut out = Vec::new();
        while let Some(doc) = stage.next_document().unwrap() {
            out.push(doc.to_string());
        }
        out
    }

    const SALES: [&str; 4] = [
        r#"{"item": "a", "qty": 2}"#,
        r#"{"item": "b", "qty": 1}"#,
        r#"{"item": "a", "qty": 5}"#,
        r#"{"qty": 7}"#,
    ];

    #[test]
    fn groups_in_first_seen_order() {
        let out = group(
            r#"{"_id": "$item", "total": {"$sum": "$qty"}, "most": {"$max": "$qty"}}"#,
            &SALES,
        );
        assert_eq!(
            out,
            vec![
                r#"{"_id":"a","total":7,"most":5}"#,
                r#"{"_id":"b","total":1,"most":1}"#,
                r#"{"_id":null,"total":7,"most":7}"#,
            ]
        );
    }

    #[test]
    fn constant_key_groups_everything() {
        let out = group(r#"{"_id": null, "items": {"$addToSet": "$item"}}"#, &SALES);
        assert_eq!(out, vec![r#"{"_id":null,"items":["a","b"]}"#]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(group(r#"{"_id": "$item"}"#, &[]).is_empty());
    }

    #[test]
    fn split_halves_produce_the_same_groups() {
        let ctx = ExpressionContext::detached();
        let spec = Value::from_json_str(r#"{"_id": "$item", "qtys": {"$push": "$qty"}, "n": {"$sum": 1}}"#).unwrap();
        let stage = GroupSource::parse(&spec, &ctx).unwrap();
        let split = stage.split().unwrap();

        let merge = split.merge.unwrap();
        assert!(merge.as_any().downcast_ref::<GroupSource>().unwrap().is_merging());
        assert_eq!(
            merge.serialize(false).to_string(),
            r#"{"$group":{"_id":"$_id","qtys":{"$push":"$qtys"},"n":{"$sum":"$n"}}}"#
        );

        // Two shards' partial results for the same key.
        let partials = [
            r#"{"_id": "a", "qtys": [2], "n": 1}"#,
            r#"{"_id": "a", "qtys": [5], "n": 1}"#,
            r#"{"_id": "b", "qtys": [1], "n": 1}"#,
        ];
        assert_eq!(
            run(merge, &partials),
            vec![r#"{"_id":"a","qtys":[2,5],"n":2}"#, r#"{"_id":"b","qtys":[1],"n":1}"#]
        );
    }

    #[test]
    fn parse_errors() {
        let ctx = ExpressionContext::detached();
        let code = |json: &str| {
            GroupSource::parse(&Value::from_json_str(json).unwrap(), &ctx)
                .unwrap_err()
                .code()
        };
        assert_eq!(code("1"), Some(15947));
        assert_eq!(code(r#"{"n": {"$sum": 1}}"#), Some(15955));
        assert_eq!(code(r#"{"_id": 1, "$n": {"$sum": 1}}"#), Some(15950));
        assert_eq!(code(r#"{"_id": 1, "a.b": {"$sum": 1}}"#), Some(16414));
        assert_eq!(code(r#"{"_id": 1, "n": 1}"#), Some(15951));
        assert_eq!(code(r#"{"_id": 1, "n": {"$sum": 1, "$max": 1}}"#), Some(15954));
        assert_eq!(code(r#"{"_id": 1, "n": {"$avg": 1}}"#), Some(15952));
    }
}
