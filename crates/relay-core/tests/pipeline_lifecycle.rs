//! Pipeline 拓扑校验、两阶段打开/关闭与状态机行为。
//!
//! `RecordingNode` 按构造参数决定是否暴露 Source/Target 能力，并把每一次回调追加到共享日志，
//! 断言只依赖日志顺序与计数，不依赖线程调度。

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use relay_core::{
    ByteRegion, NeighborLink, OpenPhase, Pipeline, PipelineError, PipelineEvent, PipelineHandle, PipelineNode,
    PipelineSource, PipelineState, PipelineTarget, Result, error::StructuralError,
};

type Journal = Arc<Mutex<Vec<String>>>;

struct RecordingNode {
    label: String,
    source: bool,
    target: bool,
    fail_at: Option<OpenPhase>,
    journal: Journal,
    pipeline: Mutex<PipelineHandle>,
}

impl RecordingNode {
    fn new(label: impl Into<String>, source: bool, target: bool, journal: &Journal) -> Arc<Self> {
        Self::failing(label, source, target, None, journal)
    }

    fn failing(
        label: impl Into<String>,
        source: bool,
        target: bool,
        fail_at: Option<OpenPhase>,
        journal: &Journal,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            source,
            target,
            fail_at,
            journal: Arc::clone(journal),
            pipeline: Mutex::new(PipelineHandle::detached()),
        })
    }

    fn record(&self, entry: impl AsRef<str>) {
        self.journal
            .lock()
            .push(format!("{}:{}", self.label, entry.as_ref()));
    }
}

impl PipelineNode for RecordingNode {
    fn name(&self) -> &str {
        &self.label
    }

    fn set_pipeline(&self, pipeline: PipelineHandle) {
        *self.pipeline.lock() = pipeline;
    }

    fn state_has_changed(&self, state: PipelineState) {
        // 广播期间重入查询 Pipeline，必须已经看到新状态。
        let observed = self.pipeline.lock().state();
        self.record(format!("state={state}/observed={observed}"));
    }

    fn open_node(&self, phase: OpenPhase) -> Result<()> {
        self.record(format!("open={phase}"));
        if self.fail_at == Some(phase) {
            return Err(PipelineError::protocol(format!("{} refused {phase}", self.label)));
        }
        Ok(())
    }

    fn close_node(&self) {
        self.record("close");
    }

    fn as_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        if self.source { Some(self) } else { None }
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn PipelineTarget>> {
        if self.target { Some(self) } else { None }
    }
}

impl PipelineSource for RecordingNode {
    fn set_target(&self, target: Arc<dyn PipelineTarget>) {
        self.record(format!("target={}", target.name()));
    }

    fn handle_target_event(&self, event: PipelineEvent) {
        self.record(format!("event={event}"));
    }
}

impl PipelineTarget for RecordingNode {
    fn set_source(&self, source: Arc<dyn PipelineSource>) {
        self.record(format!("source={}", source.name()));
    }

    fn handle_inbound(&self, inbound: &mut ByteRegion) -> Result<()> {
        self.record(format!("inbound={}", inbound.len()));
        inbound.clear();
        Ok(())
    }

    fn give_outbound(&self, _outbound: &mut ByteRegion) -> Result<()> {
        Ok(())
    }
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal, suffix: &str) -> Vec<String> {
    journal
        .lock()
        .iter()
        .filter(|entry| entry.ends_with(&format!(":{suffix}")))
        .cloned()
        .collect()
}

/// 构造一条合法链：首节点仅 Source，中间节点双能力，末节点仅 Target。
fn valid_chain(len: usize, journal: &Journal) -> (Pipeline, Vec<Arc<RecordingNode>>) {
    let pipeline = Pipeline::with_label("recording");
    let nodes: Vec<_> = (0..len)
        .map(|index| RecordingNode::new(format!("n{index}"), index + 1 < len, index > 0, journal))
        .collect();
    for node in &nodes {
        pipeline.add(node.clone()).expect("add");
    }
    (pipeline, nodes)
}

proptest! {
    #[test]
    fn valid_topologies_link_every_pair_once(len in 2usize..8) {
        let journal = journal();
        let (pipeline, _nodes) = valid_chain(len, &journal);
        pipeline.open().expect("open");
        prop_assert_eq!(pipeline.state(), PipelineState::Open);

        let log = journal.lock().clone();
        for index in 0..len - 1 {
            let forward = format!("n{index}:target=n{}", index + 1);
            let backward = format!("n{}:source=n{index}", index + 1);
            prop_assert_eq!(log.iter().filter(|e| **e == forward).count(), 1);
            prop_assert_eq!(log.iter().filter(|e| **e == backward).count(), 1);
        }
        prop_assert_eq!(log.iter().filter(|e| e.contains(":target=")).count(), len - 1);
        prop_assert_eq!(log.iter().filter(|e| e.contains(":source=")).count(), len - 1);

        let opens: Vec<_> = log.iter().filter(|e| e.contains(":open=")).cloned().collect();
        let expected: Vec<_> = OpenPhase::ALL
            .iter()
            .flat_map(|phase| (0..len).map(move |index| format!("n{index}:open={phase}")))
            .collect();
        prop_assert_eq!(opens, expected);
    }

    #[test]
    fn invalid_topologies_fail_before_any_open(
        caps in prop::collection::vec((any::<bool>(), any::<bool>()), 2..7)
    ) {
        let last = caps.len() - 1;
        let valid = caps
            .iter()
            .enumerate()
            .all(|(index, (source, target))| *source == (index < last) && *target == (index > 0));
        prop_assume!(!valid);

        let journal = journal();
        let pipeline = Pipeline::new();
        for (index, (source, target)) in caps.iter().enumerate() {
            pipeline
                .add(RecordingNode::new(format!("n{index}"), *source, *target, &journal))
                .expect("add");
        }

        let err = pipeline.open().unwrap_err();
        prop_assert!(err.is_structural(), "unexpected error: {err}");
        prop_assert_eq!(err.code(), "relay.pipeline.structural");
        prop_assert!(journal.lock().iter().all(|e| !e.contains(":open=")));
        prop_assert_eq!(pipeline.state(), PipelineState::Closed);
    }
}

#[test]
fn a_single_node_is_rejected() {
    let journal = journal();
    let pipeline = Pipeline::new();
    pipeline
        .add(RecordingNode::new("only", true, true, &journal))
        .expect("add");
    match pipeline.open() {
        Err(PipelineError::Structural(StructuralError::TooFewNodes { count })) => {
            assert_eq!(count, 1)
        }
        other => panic!("expected TooFewNodes, got {other:?}"),
    }
}

#[test]
fn duplicate_and_late_additions_are_rejected() {
    let journal = journal();
    let (pipeline, nodes) = valid_chain(2, &journal);

    let duplicate = pipeline.add(nodes[0].clone()).unwrap_err();
    assert!(matches!(
        duplicate,
        PipelineError::Structural(StructuralError::DuplicateNode { .. })
    ));

    pipeline.open().expect("open");
    let late = pipeline
        .add(RecordingNode::new("late", false, true, &journal))
        .unwrap_err();
    assert!(matches!(
        late,
        PipelineError::Structural(StructuralError::PipelineInUse {
            state: PipelineState::Open
        })
    ));
    assert_eq!(pipeline.node_count(), 2);

    let reopen = pipeline.open().unwrap_err();
    assert!(matches!(
        reopen,
        PipelineError::Structural(StructuralError::AlreadyOpen { .. })
    ));
}

#[test]
fn close_is_idempotent_and_runs_in_reverse_order() {
    let journal = journal();
    let (pipeline, _nodes) = valid_chain(3, &journal);
    pipeline.open().expect("open");

    pipeline.close();
    pipeline.close();

    assert_eq!(entries(&journal, "close"), ["n2:close", "n1:close", "n0:close"]);
    assert_eq!(pipeline.state(), PipelineState::Closed);
}

#[test]
fn close_before_open_touches_no_node() {
    let journal = journal();
    let (pipeline, _nodes) = valid_chain(2, &journal);
    pipeline.close();
    assert!(entries(&journal, "close").is_empty());
}

#[test]
fn state_table_follows_the_lifecycle() {
    let journal = journal();
    let (pipeline, _nodes) = valid_chain(2, &journal);

    let early = pipeline.validate().unwrap_err();
    assert!(matches!(
        early,
        PipelineError::Usage {
            operation: "validate",
            state: PipelineState::Closed
        }
    ));
    pipeline.start_closing();
    assert_eq!(pipeline.state(), PipelineState::Closed);

    pipeline.open().expect("open");
    assert!(pipeline.is_usable());
    pipeline.validate().expect("open -> valid");
    assert_eq!(pipeline.state(), PipelineState::Valid);
    pipeline.validate().expect("valid is a no-op");

    pipeline.start_closing();
    assert_eq!(pipeline.state(), PipelineState::Closing);
    assert_eq!(pipeline.validate().unwrap_err().code(), "relay.pipeline.usage");

    pipeline.close();
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert!(!pipeline.is_usable());
}

#[test]
fn invalid_survives_close() {
    let journal = journal();
    let (pipeline, _nodes) = valid_chain(2, &journal);
    pipeline.open().expect("open");
    pipeline.invalidate("frame too large", None);
    assert_eq!(pipeline.state(), PipelineState::Invalid);
    assert!(!pipeline.is_usable());

    pipeline.close();
    assert_eq!(pipeline.state(), PipelineState::Invalid);
    assert_eq!(entries(&journal, "close").len(), 2);
}

#[test]
fn state_changes_are_visible_inside_the_broadcast() {
    let journal = journal();
    let (pipeline, _nodes) = valid_chain(2, &journal);
    pipeline.open().expect("open");
    pipeline.validate().expect("validate");

    let states: Vec<_> = journal
        .lock()
        .iter()
        .filter(|entry| entry.starts_with("n1:state="))
        .cloned()
        .collect();
    assert_eq!(
        states,
        ["n1:state=OPEN/observed=OPEN", "n1:state=VALID/observed=VALID"]
    );
}

#[test]
fn open_failure_closes_every_node_and_forces_invalid() {
    let journal = journal();
    let pipeline = Pipeline::with_label("failing");
    pipeline
        .add(RecordingNode::new("head", true, false, &journal))
        .expect("add")
        .add(RecordingNode::failing(
            "middle",
            true,
            true,
            Some(OpenPhase::Wire),
            &journal,
        ))
        .expect("add")
        .add(RecordingNode::new("tail", false, true, &journal))
        .expect("add");

    let err = pipeline.open().unwrap_err();
    match &err {
        PipelineError::OpenFailed { phase, node, source } => {
            assert_eq!(*phase, OpenPhase::Wire);
            assert_eq!(node, "middle");
            assert_eq!(source.code(), "relay.pipeline.protocol");
        }
        other => panic!("expected OpenFailed, got {other:?}"),
    }
    assert_eq!(err.code(), "relay.pipeline.open_failed");
    assert_eq!(pipeline.state(), PipelineState::Invalid);
    assert!(journal.lock().iter().all(|e| e != "tail:open=wire"));

    pipeline.close();
    assert_eq!(
        entries(&journal, "close"),
        ["tail:close", "middle:close", "head:close"]
    );
    assert_eq!(pipeline.state(), PipelineState::Invalid);
}

#[test]
fn handles_outlive_their_pipeline_gracefully() {
    let journal = journal();
    let (pipeline, nodes) = valid_chain(2, &journal);
    let handle = nodes[0].pipeline.lock().clone();
    assert!(handle.upgrade().is_some());

    drop(nodes);
    drop(pipeline);

    assert_eq!(handle.state(), PipelineState::Closed);
    assert!(matches!(handle.validate(), Err(PipelineError::Detached)));
    handle.start_closing();
    handle.invalidate("ignored", None);
    handle.close();
}

#[test]
fn neighbor_link_does_not_keep_its_neighbor_alive() {
    let journal = journal();
    let node: Arc<dyn PipelineNode> = RecordingNode::new("n", true, true, &journal);
    let link = NeighborLink::<dyn PipelineNode>::default();
    assert!(!link.is_linked());
    assert!(link.require().is_err());

    link.set(&node);
    assert!(link.is_linked());
    assert_eq!(link.get().map(|n| n.name().to_owned()).as_deref(), Some("n"));

    drop(node);
    assert!(!link.is_linked());
    assert!(link.get().is_none());
}
