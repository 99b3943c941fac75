//! Queue adapters between stage groups of different widths.
//!
//! Adjacent groups of equal width are wired 1:1 over a single queue. These
//! adapters are the only places where the topology fans out or in.

use crate::core::Parcel;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

/// Allocates a bounded parcel queue. Zero capacity maps to one.
pub(crate) fn connect(capacity: usize) -> (Sender<Parcel>, Receiver<Parcel>) {
    mpsc::channel(capacity.max(1))
}

/// Broadcasts every parcel read from `input` to all `outputs`, in order.
///
/// Outputs whose receiver has gone away are dropped from the broadcast; the
/// others keep receiving. When `input` closes, every output is closed.
pub(crate) fn multiplex(mut input: Receiver<Parcel>, outputs: Vec<Sender<Parcel>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut outputs = outputs;
        while let Some(parcel) = input.recv().await {
            let mut live = Vec::with_capacity(outputs.len());
            for output in outputs {
                if output.send(parcel.clone()).await.is_ok() {
                    live.push(output);
                }
            }
            outputs = live;
        }
    })
}

/// Merges every input into `output`, one forwarding task per input.
///
/// Each task owns its own handle on `output`, so the merged queue closes only
/// after the last input has closed and drained.
pub(crate) fn demultiplex(output: Sender<Parcel>, inputs: Vec<Receiver<Parcel>>) -> Vec<JoinHandle<()>> {
    inputs
        .into_iter()
        .map(|mut input| {
            let output = output.clone();
            tokio::spawn(async move {
                while let Some(parcel) = input.recv().await {
                    if output.send(parcel).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect()
}
