//! Pipeline: window-controlled fan-out of SegmentFetchers across a fixed
//! array of pipe slots, with AIMD growth/cut and epoch-latched cuts.
//!
//! Grounded directly on `pipeline-interests.cpp`/`.hpp` (slot array,
//! waiting queues, growth/cut bookkeeping) and on the AIMD shape in
//! `examples/other_examples/013f484d_TokTok-rs-toxcore-c__.../aimd.rs.rs`
//! (slow-start-vs-congestion-avoidance branch, ssthresh floor).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::face::Face;
use crate::fetcher::{run_fetch, FetchResult, UNBOUNDED_RETRIES};
use crate::rtt::RttEstimator;
use crate::types::{Data, Interest, Name, SegmentNo};

#[derive(Debug, Clone)]
pub struct Options {
    pub must_be_fresh: bool,
    /// Fixed Interest lifetime in ms; 0 means "derive from the current
    /// RTO" (`getInterestLifetime`).
    pub interest_lifetime_ms: u64,
    pub start_pipeline_size: usize,
    pub max_pipeline_size: usize,
    /// 0 disables slow start (always congestion-avoidance growth).
    pub slow_start_threshold: usize,
    pub n_timeout_before_reset: u32,
    pub window_cut_multiplier: f64,
    /// `-M`: once per epoch, halve the RTO multiplier back down on the
    /// first Data received after a cut (`handleData` step 5).
    pub rto_multiplier_reset: bool,
    /// -1 for unbounded retries.
    pub max_retries_on_timeout_or_nack: i64,
    pub random_wait_max_ms: u64,
    pub start_wait: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            must_be_fresh: true,
            interest_lifetime_ms: 0,
            start_pipeline_size: 1,
            max_pipeline_size: 1,
            slow_start_threshold: 20,
            n_timeout_before_reset: 3,
            window_cut_multiplier: 0.75,
            rto_multiplier_reset: false,
            max_retries_on_timeout_or_nack: UNBOUNDED_RETRIES,
            random_wait_max_ms: 0,
            start_wait: false,
        }
    }
}

struct WindowState {
    current: f64,
    calculated: f64,
    /// Window size as of the start of the current epoch; the cut
    /// multiplier applies to this, not to `calculated`, and growth in
    /// congestion avoidance is `+= 1/last`.
    last: f64,
    missing_events: i64,
    is_cut: bool,
    /// Per-epoch latch on RTO-multiplier changes, independent of `is_cut`
    /// but cleared at the same time (`handleWindowEvent`).
    has_multiplier_changed: bool,
}

struct Slot {
    handle: Option<tokio::task::JoinHandle<()>>,
    segment_no: SegmentNo,
    /// Set when this slot's fetcher terminally failed while `lastSegmentNo`
    /// was still unknown; checked once it becomes known (`handleData` step
    /// 6) to decide whether an in-range segment was unrecoverably lost.
    errored: bool,
}

struct PipelineShared {
    options: Options,
    rtt: RttEstimator,
    window: WindowState,
    waiting_pipes: VecDeque<usize>,
    waiting_segments: VecDeque<SegmentNo>,
    next_segment_no: SegmentNo,
    last_segment_no: Option<SegmentNo>,
    has_final_block_id: bool,
    exclude_segment_no: Option<SegmentNo>,
    has_error: bool,
    has_failure: bool,
    n_consecutive_timeouts: u32,
    segments_delivered: u64,
    failure_reason: Option<String>,
    prefix: Name,
    slots: Vec<Slot>,
}

enum SlotEvent {
    Timeout,
    Data {
        data: Data,
        transmissions: Vec<Instant>,
        arrival: Instant,
    },
    Failed(String),
}

struct SlotMsg {
    slot: usize,
    segment_no: SegmentNo,
    event: SlotEvent,
}

/// Picks the next segment number to fetch, matching `fetchNextSegment`'s
/// literal draw order: waiting (previously vetoed) segments first, else the
/// next sequential number; the excluded segment is skipped *before* the
/// `last_segment_no` bound is checked, so a skip always gets re-validated
/// against the bound (matching `pipeline-interests.cpp::fetchNextSegment`,
/// whose `++segmentNo` exclude-skip precedes its `segmentNo > lastSegmentNo`
/// check).
fn pick_next_segment(s: &mut PipelineShared) -> Option<SegmentNo> {
    let mut candidate = if let Some(seg) = s.waiting_segments.pop_front() {
        seg
    } else {
        let seg = s.next_segment_no;
        s.next_segment_no += 1;
        seg
    };
    if Some(candidate) == s.exclude_segment_no {
        candidate = s.next_segment_no;
        s.next_segment_no += 1;
    }
    if let Some(last) = s.last_segment_no {
        if candidate > last {
            return None;
        }
    }
    Some(candidate)
}

fn get_interest_lifetime(shared: &Rc<RefCell<PipelineShared>>) -> u64 {
    let s = shared.borrow();
    if s.options.interest_lifetime_ms > 0 {
        return s.options.interest_lifetime_ms;
    }
    s.rtt.rto_ms().unwrap_or_else(RttEstimator::initial_rto_ms).round() as u64
}

/// The `canSend` veto: returns false (and requeues slot+segment) if the
/// window has contracted below what was already reserved for this slot.
fn can_send(shared: &Rc<RefCell<PipelineShared>>, segment_no: SegmentNo, slot: usize) -> bool {
    let mut s = shared.borrow_mut();
    if s.window.current <= s.window.calculated {
        true
    } else {
        s.window.current -= 1.0;
        s.waiting_pipes.push_back(slot);
        s.waiting_segments.push_back(segment_no);
        false
    }
}

/// `handleError` step 3: cut the window at most once per epoch, scaling
/// down from `lastWindowSize` (the window size as of epoch start, not the
/// possibly-since-grown `calculatedWindowSize`), and bump the RTO
/// multiplier a second time on top of `handleError` step 2's increment.
fn cut_window(s: &mut PipelineShared) {
    if !s.window.is_cut {
        s.window.is_cut = true;
        s.window.calculated = (s.window.last * s.options.window_cut_multiplier)
            .clamp(s.options.start_pipeline_size as f64, s.options.max_pipeline_size as f64);
        s.rtt.increment_rto_multiplier();
    }
}

/// `handleData` step 8: unconditional per-Data growth, additive by whole
/// segments during slow start (`calculatedWindowSize <= ssthresh`), by
/// `1/lastWindowSize` once past it (congestion avoidance). Growth happens
/// on every Data, even within a cut epoch — only `handleWindowEvent`'s
/// countdown gates when the *next* cut is allowed.
fn grow_window(s: &mut PipelineShared) {
    if s.options.slow_start_threshold == 0 || s.window.calculated <= s.options.slow_start_threshold as f64 {
        s.window.calculated += 1.0;
    } else {
        s.window.calculated += 1.0 / s.window.last;
    }
    s.window.calculated = s
        .window
        .calculated
        .clamp(s.options.start_pipeline_size as f64, s.options.max_pipeline_size as f64);
}

/// `handleWindowEvent`: ticked on every `handleData` and `handleError`
/// regardless of whether this epoch is cut; once the countdown reaches
/// zero the epoch closes, clearing both per-epoch latches and re-baselining
/// `lastWindowSize`/`nMissingWindowEvents` at the current window size.
fn handle_window_event(s: &mut PipelineShared) {
    s.window.missing_events -= 1;
    if s.window.missing_events <= 0 {
        s.window.is_cut = false;
        s.window.has_multiplier_changed = false;
        s.window.missing_events = s.window.calculated.round() as i64;
        s.window.last = s.window.calculated;
    }
}

fn dispatch_slot(
    shared: &Rc<RefCell<PipelineShared>>,
    face: Rc<dyn Face>,
    tx: &mpsc::UnboundedSender<SlotMsg>,
    slot: usize,
    jitter: bool,
) {
    let segment_no = {
        let mut s = shared.borrow_mut();
        if s.has_failure {
            drop(s);
            fail(
                shared,
                "fetching terminated but no final segment number has been found".to_string(),
            );
            return;
        }
        match pick_next_segment(&mut s) {
            Some(seg) => seg,
            None => return,
        }
    };

    let (name, must_be_fresh, max_retries, random_wait_max) = {
        let s = shared.borrow();
        (
            s.prefix.with_segment(segment_no),
            s.options.must_be_fresh,
            s.options.max_retries_on_timeout_or_nack,
            s.options.random_wait_max_ms,
        )
    };
    let interest = Interest::new(name, must_be_fresh, RttEstimator::initial_rto_ms() as u64);

    let shared_lifetime = shared.clone();
    let shared_can_send = shared.clone();
    let shared_slot_store = shared.clone();
    let tx_timeout = tx.clone();
    let tx_terminal = tx.clone();

    let handle = tokio::task::spawn_local(async move {
        if jitter && random_wait_max > 0 {
            let delay_ms = rand::thread_rng().gen_range(0..=random_wait_max);
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let result = run_fetch(
            &*face,
            interest,
            max_retries,
            move || get_interest_lifetime(&shared_lifetime),
            move || can_send(&shared_can_send, segment_no, slot),
            move || {
                let _ = tx_timeout.send(SlotMsg {
                    slot,
                    segment_no,
                    event: SlotEvent::Timeout,
                });
            },
        )
        .await;

        match result {
            FetchResult::Success(success) => {
                let _ = tx_terminal.send(SlotMsg {
                    slot,
                    segment_no,
                    event: SlotEvent::Data {
                        data: success.data,
                        transmissions: success.transmissions,
                        arrival: success.arrival,
                    },
                });
            }
            FetchResult::Deferred => {}
            FetchResult::Failed(err) => {
                let _ = tx_terminal.send(SlotMsg {
                    slot,
                    segment_no,
                    event: SlotEvent::Failed(err.to_string()),
                });
            }
        }
    });

    shared_slot_store.borrow_mut().slots[slot] = Slot {
        handle: Some(handle),
        segment_no,
        errored: false,
    };
}

/// True once every segment this pipeline is responsible for has arrived.
/// The excluded segment (the seed the Consumer already holds) counts
/// toward the total but is never delivered through the pipeline itself, so
/// it is subtracted out of the target count.
fn is_complete(s: &PipelineShared) -> bool {
    let Some(last) = s.last_segment_no else {
        return false;
    };
    if !s.has_final_block_id {
        return false;
    }
    let total = last + 1;
    let excluded = match s.exclude_segment_no {
        Some(seg) if seg <= last => 1,
        _ => 0,
    };
    s.segments_delivered >= total - excluded
}

/// Drains free slots into new fetches while the window has room.
fn redraw(shared: &Rc<RefCell<PipelineShared>>, face: &Rc<dyn Face>, tx: &mpsc::UnboundedSender<SlotMsg>) {
    loop {
        let slot = {
            let mut s = shared.borrow_mut();
            if s.has_failure || s.window.current >= s.window.calculated {
                None
            } else if let Some(slot) = s.waiting_pipes.pop_front() {
                s.window.current += 1.0;
                Some(slot)
            } else {
                None
            }
        };
        let Some(slot) = slot else { break };
        let jitter = !shared.borrow().options.start_wait;
        dispatch_slot(shared, face.clone(), tx, slot, jitter);
    }
}

fn fail(shared: &Rc<RefCell<PipelineShared>>, reason: String) {
    let mut s = shared.borrow_mut();
    if s.failure_reason.is_none() {
        s.failure_reason = Some(reason);
    }
    s.has_error = true;
    s.has_failure = true;
    for slot in s.slots.iter_mut() {
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }
}

/// `handleData` step 6: once `FinalBlockId` is learned for the first time,
/// cancel every in-flight fetcher assigned a segment past it. If an
/// in-range fetcher had already failed while `lastSegmentNo` was still
/// unknown (latched via `errored`, see `handle_fail`), the content is
/// unrecoverably missing a piece and the pipeline fails now.
fn cancel_out_of_range_fetchers(s: &mut PipelineShared, last: SegmentNo) -> Option<String> {
    for other in s.slots.iter_mut() {
        if other.segment_no > last {
            if let Some(handle) = other.handle.take() {
                handle.abort();
            }
        } else if other.errored {
            return Some(format!("failure retrieving segment #{}", other.segment_no));
        }
    }
    None
}

fn handle_data(
    shared: &Rc<RefCell<PipelineShared>>,
    face: &Rc<dyn Face>,
    tx: &mpsc::UnboundedSender<SlotMsg>,
    data_tx: &mpsc::UnboundedSender<Data>,
    slot: usize,
    data: Data,
    transmissions: Vec<Instant>,
    arrival: Instant,
) -> bool {
    {
        let mut s = shared.borrow_mut();
        if s.has_error {
            return true;
        }
        s.n_consecutive_timeouts = 0;
    }

    debug!(segment = %data.name, "data_received");
    let final_block_id = data.final_block_id;
    let _ = data_tx.send(data);

    let fail_reason = {
        let mut s = shared.borrow_mut();
        s.rtt.add_measurement(&transmissions, arrival);

        if !s.window.has_multiplier_changed && s.options.rto_multiplier_reset {
            s.rtt.decrement_rto_multiplier();
            s.window.has_multiplier_changed = true;
        }

        if !s.has_final_block_id {
            if let Some(last) = final_block_id {
                s.last_segment_no = Some(last);
                s.has_final_block_id = true;
                cancel_out_of_range_fetchers(&mut s, last)
            } else {
                None
            }
        } else {
            None
        }
    };

    if let Some(reason) = fail_reason {
        fail(shared, reason);
        return true;
    }

    let done = {
        let mut s = shared.borrow_mut();
        s.slots[slot].handle = None;
        s.window.current -= 1.0;
        s.waiting_pipes.push_back(slot);
        s.segments_delivered += 1;
        grow_window(&mut s);
        is_complete(&s)
    };

    if done {
        return true;
    }

    redraw(shared, face, tx);
    handle_window_event(&mut shared.borrow_mut());
    false
}

fn handle_timeout(shared: &Rc<RefCell<PipelineShared>>) {
    let mut s = shared.borrow_mut();
    s.n_consecutive_timeouts += 1;

    if !s.window.has_multiplier_changed {
        s.rtt.increment_rto_multiplier();
        s.window.has_multiplier_changed = true;
    }
    cut_window(&mut s);

    if s.options.n_timeout_before_reset > 0 && s.n_consecutive_timeouts == s.options.n_timeout_before_reset {
        s.rtt.reset();
        s.n_consecutive_timeouts = 0;
    }

    handle_window_event(&mut s);
}

fn handle_fail(shared: &Rc<RefCell<PipelineShared>>, slot: usize, segment_no: SegmentNo, reason: String) {
    let mut s = shared.borrow_mut();
    if s.has_error {
        return;
    }

    if s.has_final_block_id {
        if let Some(last) = s.last_segment_no {
            if segment_no <= last {
                drop(s);
                fail(shared, reason);
            }
            // Else: a stale failure from a fetcher `handleData` step 6
            // already cancelled once `lastSegmentNo` became known; ignore.
        }
        return;
    }

    // `lastSegmentNo` isn't known yet: this fetcher might have been chasing
    // a segment past the real end. Cancel every fetcher assigned a higher
    // segment number, and latch the failure for `handleData` step 6 to
    // notice later if this segment turns out to be in range.
    s.slots[slot].handle = None;
    s.slots[slot].errored = true;
    for other in s.slots.iter_mut() {
        if other.segment_no > segment_no {
            if let Some(handle) = other.handle.take() {
                handle.abort();
            }
        }
    }
    let should_fail_now = !s.slots.iter().any(|sl| sl.handle.is_some());
    if should_fail_now {
        drop(s);
        fail(
            shared,
            "fetching terminated but no final segment number has been found".to_string(),
        );
    } else {
        s.has_failure = true;
    }
}

pub struct PipelineParams {
    pub prefix: Name,
    pub exclude_segment_no: Option<SegmentNo>,
    pub initial_last_segment_no: Option<SegmentNo>,
    pub options: Options,
}

/// Runs the pipeline to completion: fetches every segment `0..=lastSegmentNo`
/// (discovering `lastSegmentNo` on the fly if not supplied up front),
/// delivering each via `data_tx`, until either all are delivered (`Ok(())`)
/// or a terminal failure occurs (`Err(reason)`).
pub async fn run(
    face: Rc<dyn Face>,
    params: PipelineParams,
    data_tx: mpsc::UnboundedSender<Data>,
) -> Result<(), String> {
    let options = params.options;
    let max_pipeline_size = options.max_pipeline_size.max(options.start_pipeline_size).max(1);
    let start_pipeline_size = options.start_pipeline_size.min(max_pipeline_size);

    let shared = Rc::new(RefCell::new(PipelineShared {
        options,
        rtt: RttEstimator::new(),
        window: WindowState {
            current: 0.0,
            calculated: start_pipeline_size as f64,
            last: start_pipeline_size as f64,
            missing_events: start_pipeline_size as i64,
            is_cut: false,
            has_multiplier_changed: false,
        },
        waiting_pipes: VecDeque::new(),
        waiting_segments: VecDeque::new(),
        next_segment_no: 0,
        last_segment_no: params.initial_last_segment_no,
        has_final_block_id: params.initial_last_segment_no.is_some(),
        exclude_segment_no: params.exclude_segment_no,
        has_error: false,
        has_failure: false,
        n_consecutive_timeouts: 0,
        segments_delivered: 0,
        failure_reason: None,
        prefix: params.prefix,
        slots: (0..max_pipeline_size)
            .map(|_| Slot {
                handle: None,
                segment_no: 0,
                errored: false,
            })
            .collect(),
    }));

    let (tx, mut rx) = mpsc::unbounded_channel();

    for slot in 0..max_pipeline_size {
        if slot < start_pipeline_size {
            shared.borrow_mut().window.current += 1.0;
            dispatch_slot(&shared, face.clone(), &tx, slot, true);
        } else {
            shared.borrow_mut().waiting_pipes.push_back(slot);
        }
    }

    while let Some(msg) = rx.recv().await {
        let done = match msg.event {
            SlotEvent::Timeout => {
                handle_timeout(&shared);
                false
            }
            SlotEvent::Data {
                data,
                transmissions,
                arrival,
            } => handle_data(&shared, &face, &tx, &data_tx, msg.slot, data, transmissions, arrival),
            SlotEvent::Failed(reason) => {
                handle_fail(&shared, msg.slot, msg.segment_no, reason);
                false
            }
        };

        let has_error = shared.borrow().has_error;
        if done || has_error {
            break;
        }
    }

    let s = shared.borrow();
    if s.has_error {
        Err(s.failure_reason.clone().unwrap_or_else(|| "pipeline failed".to_string()))
    } else {
        Ok(())
    }
}
