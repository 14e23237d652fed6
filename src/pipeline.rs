use crate::adaptive_dt::{reduce_accumulators, BeamAccumulators};
use crate::prtls::{Ab5History, BeamData, PlasmaParticle};
use crate::{Float, WakeError, WakeResult, COMM_Z_TAG};
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often a blocked receive looks at the abort flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything a rank passes to the rank below it after its sweep.
#[derive(Clone, Debug, Default)]
pub struct Handoff {
    /// `Previous1` and `Previous2` planes, see `Fields::handoff_payload`.
    pub fields: Vec<Float>,
    /// Plasma state after the last slice of the sending rank, per species.
    pub plasmas: Vec<(Vec<PlasmaParticle>, Ab5History)>,
    /// Beam particles that slipped below the sending rank, per beam.
    pub slipped: Vec<BeamData>,
}

#[derive(Debug)]
enum Message {
    Handoff { tag: i32, payload: Box<Handoff> },
    Reduce { accs: Vec<BeamAccumulators> },
    TimeStep { dt: Float, min_uz: Float },
    Abort(String),
}

/// Channel endpoints of one rank of the longitudinal pipeline. Rank
/// `nranks - 1` holds the head of the box and starts every step.
pub struct RankComm {
    pub rank: usize,
    pub nranks: usize,
    from_upper: Option<Receiver<Message>>,
    to_lower: Option<SyncSender<Message>>,
    pending: Option<JoinHandle<bool>>,
    ctrl_rx: Receiver<Message>,
    ctrl_tx: Vec<Sender<Message>>,
    aborted: Arc<AtomicBool>,
}

/// Connects `nranks` ranks: a rendezvous channel from every rank to the one
/// below it, and a control channel into every rank for collectives.
pub fn build_comms(nranks: usize) -> Vec<RankComm> {
    let aborted = Arc::new(AtomicBool::new(false));
    let (ctrl_tx, ctrl_rx): (Vec<_>, Vec<_>) = (0..nranks).map(|_| mpsc::channel()).unzip();
    let mut down_tx: Vec<Option<SyncSender<Message>>> = vec![None; nranks];
    let mut down_rx: Vec<Option<Receiver<Message>>> = (0..nranks).map(|_| None).collect();
    for r in 1..nranks {
        let (tx, rx) = mpsc::sync_channel(0);
        down_tx[r] = Some(tx);
        down_rx[r - 1] = Some(rx);
    }
    ctrl_rx
        .into_iter()
        .zip(down_tx.into_iter().zip(down_rx.into_iter()))
        .enumerate()
        .map(|(rank, (ctrl_rx, (to_lower, from_upper)))| RankComm {
            rank,
            nranks,
            from_upper,
            to_lower,
            pending: None,
            ctrl_rx,
            ctrl_tx: ctrl_tx.clone(),
            aborted: aborted.clone(),
        })
        .collect()
}

impl RankComm {
    pub fn is_head(&self) -> bool {
        self.rank + 1 == self.nranks
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn aborted_error(&self, what: &str) -> WakeError {
        WakeError::Aborted(format!("rank {} stopped while {}", self.rank, what))
    }

    /// Blocking receive that gives up once the run is aborted.
    fn recv(&self, rx: &Receiver<Message>, what: &str) -> WakeResult<Message> {
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Message::Abort(reason)) => {
                    return Err(WakeError::Aborted(format!(
                        "rank {} received abort: {}",
                        self.rank, reason
                    )))
                }
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_aborted() {
                        return Err(self.aborted_error(what));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.aborted_error(what)),
            }
        }
    }

    /// Waits for the handoff of the rank above. `None` on the head rank.
    pub fn wait(&mut self) -> WakeResult<Option<Handoff>> {
        let rx = match self.from_upper.as_ref() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match self.recv(rx, "waiting for the slice handoff")? {
            Message::Handoff { tag, payload } if tag == COMM_Z_TAG => {
                debug!("rank {}: handoff received", self.rank);
                Ok(Some(*payload))
            }
            other => Err(WakeError::Aborted(format!(
                "rank {} expected a slice handoff, got {:?}",
                self.rank, other
            ))),
        }
    }

    /// Starts sending `handoff` to the rank below without waiting for it to
    /// be received. A previous send is completed first. Rank 0 drops it.
    pub fn notify(&mut self, handoff: Handoff) -> WakeResult<()> {
        self.notify_finish()?;
        let tx = match self.to_lower.as_ref() {
            Some(tx) => tx.clone(),
            None => return Ok(()),
        };
        let msg = Message::Handoff {
            tag: COMM_Z_TAG,
            payload: Box::new(handoff),
        };
        let handle = thread::Builder::new()
            .name(format!("rank{}-send", self.rank))
            .spawn(move || tx.send(msg).is_ok())?;
        self.pending = Some(handle);
        Ok(())
    }

    /// Completes the outstanding send, if any.
    pub fn notify_finish(&mut self) -> WakeResult<()> {
        match self.pending.take() {
            Some(handle) => match handle.join() {
                Ok(true) => Ok(()),
                Ok(false) => Err(self.aborted_error("sending the slice handoff")),
                Err(_) => Err(WakeError::Aborted(format!(
                    "send thread of rank {} panicked",
                    self.rank
                ))),
            },
            None => Ok(()),
        }
    }

    /// Reduces the time step accumulators of every rank on the head rank,
    /// which runs `compute` on the result and broadcasts `(dt, min_uz)`.
    pub fn all_reduce_time_step<F>(
        &mut self,
        local: Vec<BeamAccumulators>,
        compute: F,
    ) -> WakeResult<(Float, Float)>
    where
        F: FnOnce(Vec<BeamAccumulators>) -> WakeResult<(Float, Float)>,
    {
        let head = self.nranks - 1;
        if !self.is_head() {
            self.ctrl_tx[head]
                .send(Message::Reduce { accs: local })
                .map_err(|_| self.aborted_error("sending time step data"))?;
            return match self.recv(&self.ctrl_rx, "waiting for the time step")? {
                Message::TimeStep { dt, min_uz } => Ok((dt, min_uz)),
                other => Err(WakeError::Aborted(format!(
                    "rank {} expected the time step, got {:?}",
                    self.rank, other
                ))),
            };
        }

        let mut accs = local;
        for _ in 0..head {
            match self.recv(&self.ctrl_rx, "reducing time step data")? {
                Message::Reduce { accs: other } => reduce_accumulators(&mut accs, &other),
                other => {
                    return Err(WakeError::Aborted(format!(
                        "head rank expected time step data, got {:?}",
                        other
                    )))
                }
            }
        }
        let (dt, min_uz) = compute(accs)?;
        for tx in self.ctrl_tx[..head].iter() {
            tx.send(Message::TimeStep { dt, min_uz })
                .map_err(|_| self.aborted_error("broadcasting the time step"))?;
        }
        Ok((dt, min_uz))
    }

    /// Stops every rank: blocked receives return `WakeError::Aborted`.
    pub fn abort(&self, reason: &str) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("rank {} aborts the run: {}", self.rank, reason);
        for (r, tx) in self.ctrl_tx.iter().enumerate() {
            if r != self.rank {
                let _ = tx.send(Message::Abort(reason.to_string()));
            }
        }
    }
}

impl Drop for RankComm {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn handoff(val: Float) -> Handoff {
        Handoff {
            fields: vec![val; 4],
            ..Default::default()
        }
    }

    #[test]
    fn single_rank_is_head_and_has_no_neighbours() {
        let mut comms = build_comms(1);
        let c = &mut comms[0];
        assert!(c.is_head());
        assert!(c.wait().unwrap().is_none());
        c.notify(handoff(1.0)).unwrap();
        c.notify_finish().unwrap();
        let (dt, _) = c.all_reduce_time_step(vec![], |_| Ok((0.5, 3.0))).unwrap();
        assert_eq!(dt, 0.5);
    }

    #[test]
    fn handoff_goes_downstream() {
        let mut comms = build_comms(2);
        let mut upper = comms.pop().unwrap();
        let mut lower = comms.pop().unwrap();
        let sender = thread::spawn(move || {
            upper.notify(handoff(2.0)).unwrap();
            upper.notify(handoff(3.0)).unwrap();
            upper.notify_finish().unwrap();
        });
        assert_eq!(lower.wait().unwrap().unwrap().fields, vec![2.0; 4]);
        assert_eq!(lower.wait().unwrap().unwrap().fields, vec![3.0; 4]);
        sender.join().unwrap();
    }

    #[test]
    fn abort_releases_a_waiting_rank() {
        let mut comms = build_comms(3);
        let head = comms.pop().unwrap();
        let mut waiting = comms.pop().unwrap();
        let t = thread::spawn(move || waiting.wait());
        head.abort("test failure");
        assert!(head.is_aborted());
        assert!(matches!(t.join().unwrap(), Err(WakeError::Aborted(_))));
    }
}
