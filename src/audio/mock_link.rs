//! In-memory [`VoiceLink`] for tests.
//!
//! Every session gets its own frame channel, handed to the test through
//! [`Outgoing`] in the order sessions were opened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::player::VoiceLink;

/// Frames buffered per session.
const SESSION_FRAMES: usize = 64;

pub struct MockLink {
    sessions: mpsc::UnboundedSender<mpsc::Receiver<Vec<i16>>>,
    muted: AtomicBool,
    deafened: AtomicBool,
}

impl MockLink {
    pub fn new(muted: bool, deafened: bool) -> (Arc<Self>, Outgoing) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            sessions,
            muted: AtomicBool::new(muted),
            deafened: AtomicBool::new(deafened),
        });
        let outgoing = Outgoing {
            sessions: rx,
            current: None,
        };
        (link, outgoing)
    }
}

impl VoiceLink for MockLink {
    fn audio_outgoing(&self) -> mpsc::Sender<Vec<i16>> {
        let (tx, rx) = mpsc::channel(SESSION_FRAMES);
        // Dropped if the test let go of `Outgoing`: the session sees a closed sink
        let _ = self.sessions.send(rx);
        tx
    }

    fn self_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn set_self_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn self_deafened(&self) -> bool {
        self.deafened.load(Ordering::SeqCst)
    }

    fn set_self_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::SeqCst);
    }
}

/// Test side of a [`MockLink`].
pub struct Outgoing {
    sessions: mpsc::UnboundedReceiver<mpsc::Receiver<Vec<i16>>>,
    current: Option<mpsc::Receiver<Vec<i16>>>,
}

impl Outgoing {
    /// The next session's frame channel.
    pub async fn next_session(&mut self) -> Option<mpsc::Receiver<Vec<i16>>> {
        self.sessions.recv().await
    }

    /// The next frame, moving on to later sessions as earlier ones close.
    pub async fn recv(&mut self) -> Option<Vec<i16>> {
        loop {
            if let Some(rx) = self.current.as_mut() {
                if let Some(frame) = rx.recv().await {
                    return Some(frame);
                }
            }
            self.current = Some(self.sessions.recv().await?);
        }
    }

    /// Every frame available right now.
    pub fn drain(&mut self) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        loop {
            if self.current.is_none() {
                match self.sessions.try_recv() {
                    Ok(rx) => self.current = Some(rx),
                    Err(_) => return frames,
                }
            }
            let Some(rx) = self.current.as_mut() else {
                return frames;
            };
            match rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(TryRecvError::Empty) => return frames,
                Err(TryRecvError::Disconnected) => self.current = None,
            }
        }
    }
}
