//! Voice capture: `Idle -> Listening -> Idle`.
//!
//! A [`VoiceCapture`] hands out at most one [`CaptureSession`] at a time. The
//! session streams partial transcripts followed by one final transcript, and
//! owns the audio resource it was started with. The resource goes back to the
//! recognizer exactly once: on a final result, on an error, on `stop`, or
//! when the session is dropped.

use std::pin::Pin;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::task::{ Context, Poll };

use futures::Stream;
use log::{ debug, warn };
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Partial(String),
    Final(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("speech recognition is not supported on this device")]
    Unsupported,

    #[error("a capture session is already listening")]
    AlreadyListening,

    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("recognizer failed: {0}")]
    Recognizer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Listening,
}

pub type EventSender = mpsc::UnboundedSender<Result<CaptureEvent, CaptureError>>;

/// A speech-to-text backend.
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Audio input held for the length of one session.
    type Resource: Send + Unpin + 'static;

    fn acquire(&self) -> Result<Self::Resource, CaptureError>;

    /// Begins recognition on `resource`, pushing events into `events` until
    /// a final transcript or an error has been sent.
    fn listen(&self, resource: &mut Self::Resource, events: EventSender) -> Result<(), CaptureError>;

    fn release(&self, resource: Self::Resource);
}

pub struct VoiceCapture<R: SpeechRecognizer> {
    recognizer: Arc<R>,
    listening: Arc<AtomicBool>,
}

impl<R: SpeechRecognizer> VoiceCapture<R> {
    pub fn new(recognizer: R) -> Self {
        Self { recognizer: Arc::new(recognizer), listening: Arc::new(AtomicBool::new(false)) }
    }

    pub fn state(&self) -> CaptureState {
        if self.listening.load(Ordering::Acquire) {
            CaptureState::Listening
        } else {
            CaptureState::Idle
        }
    }

    pub fn start(&self) -> Result<CaptureSession<R>, CaptureError> {
        if self.listening.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(CaptureError::AlreadyListening);
        }

        let mut resource = match self.recognizer.acquire() {
            Ok(resource) => resource,
            Err(e) => {
                self.listening.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.recognizer.listen(&mut resource, tx) {
            self.recognizer.release(resource);
            self.listening.store(false, Ordering::Release);
            return Err(e);
        }

        debug!("Voice capture listening");
        Ok(CaptureSession {
            recognizer: self.recognizer.clone(),
            listening: self.listening.clone(),
            resource: Some(resource),
            events: rx,
        })
    }
}

/// One listening period. Yields events until the final transcript or an
/// error, then ends.
pub struct CaptureSession<R: SpeechRecognizer> {
    recognizer: Arc<R>,
    listening: Arc<AtomicBool>,
    resource: Option<R::Resource>,
    events: mpsc::UnboundedReceiver<Result<CaptureEvent, CaptureError>>,
}

impl<R: SpeechRecognizer> CaptureSession<R> {
    pub fn is_active(&self) -> bool {
        self.resource.is_some()
    }

    pub fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.events.close();
            self.recognizer.release(resource);
            self.listening.store(false, Ordering::Release);
            debug!("Voice capture idle");
        }
    }
}

impl<R: SpeechRecognizer> Stream for CaptureSession<R> {
    type Item = Result<CaptureEvent, CaptureError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.resource.is_none() {
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(CaptureEvent::Partial(text)))) => {
                Poll::Ready(Some(Ok(CaptureEvent::Partial(text))))
            }
            Poll::Ready(Some(Ok(CaptureEvent::Final(text)))) => {
                this.finish();
                Poll::Ready(Some(Ok(CaptureEvent::Final(text))))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!("Voice capture failed: {}", e);
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl<R: SpeechRecognizer> Drop for CaptureSession<R> {
    fn drop(&mut self) {
        self.finish();
    }
}
