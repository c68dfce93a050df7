//! User consent for the EAC1 step
//!
//! Before PACE the user sees who asks for which data and enters the password.
//! [`UserConsent`] is the seam to whatever presents this to the user. It may
//! block for as long as the user needs but has to return once the token is
//! cancelled.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use eidcard_ifd::{CancellationToken, IfdError, PasswordId};
use tracing::debug;
use zeroize::Zeroizing;

use crate::chat::Chat;
use crate::cvc::CardVerifiableCertificate;
use crate::description::CertificateDescription;

/// Everything shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentContent {
    /// Terminal certificate of the eService
    pub terminal_certificate: CardVerifiableCertificate,
    /// Certificate description of the eService
    pub certificate_description: CertificateDescription,
    /// Rights the eService needs
    pub required_chat: Chat,
    /// Rights the user may grant additionally
    pub optional_chat: Option<Chat>,
    /// Preselected rights
    pub selected_chat: Chat,
    /// Password the user has to enter
    pub password_id: PasswordId,
}

/// The user's answer
#[derive(Clone)]
pub struct ConsentResponse {
    /// Rights the user agreed to
    pub selected_chat: Chat,
    /// Password, `None` when the reader's pinpad is used
    pub pin: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for ConsentResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentResponse")
            .field("selected_chat", &self.selected_chat)
            .field("pin", &self.pin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConsentResponse {
    /// Accept `selected_chat` and enter `pin`
    pub fn new(selected_chat: Chat, pin: Option<Vec<u8>>) -> Self {
        Self {
            selected_chat,
            pin: pin.map(Zeroizing::new),
        }
    }
}

/// Presents [`ConsentContent`] to the user
pub trait UserConsent: Send + Sync {
    /// Block until the user answered.
    ///
    /// Returns [`IfdError::CancellationByUser`] when the user declines and the
    /// error of [`CancellationToken::check`] once `token` is cancelled.
    fn request(
        &self,
        content: &ConsentContent,
        token: &CancellationToken,
    ) -> Result<ConsentResponse, IfdError>;
}

/// Answer to a [`ConsentPrompt`]
#[derive(Debug, Clone)]
pub enum ConsentAnswer {
    /// The user agreed
    Accept(ConsentResponse),
    /// The user declined
    Decline,
}

/// A pending consent request delivered to the user interface
#[derive(Debug)]
pub struct ConsentPrompt {
    /// What to show
    pub content: ConsentContent,
    reply: Sender<ConsentAnswer>,
}

impl ConsentPrompt {
    /// Send the user's answer. Returns `false` if the request was abandoned.
    pub fn answer(self, answer: ConsentAnswer) -> bool {
        self.reply.send(answer).is_ok()
    }
}

/// [`UserConsent`] forwarding requests to a user interface thread
#[derive(Debug, Clone)]
pub struct ChannelConsent {
    prompts: Sender<ConsentPrompt>,
    poll: Duration,
}

impl ChannelConsent {
    /// Create the consent and the receiver the user interface reads prompts from
    pub fn new() -> (Self, Receiver<ConsentPrompt>) {
        let (prompts, receiver) = unbounded();
        (
            Self {
                prompts,
                poll: Duration::from_millis(50),
            },
            receiver,
        )
    }

    /// How often a waiting request checks its token
    pub const fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

impl UserConsent for ChannelConsent {
    fn request(
        &self,
        content: &ConsentContent,
        token: &CancellationToken,
    ) -> Result<ConsentResponse, IfdError> {
        token.check()?;
        let (reply, answers) = bounded(1);
        let prompt = ConsentPrompt {
            content: content.clone(),
            reply,
        };
        if self.prompts.send(prompt).is_err() {
            debug!("No user interface listening for consent requests");
            return Err(IfdError::CancellationByUser);
        }

        loop {
            token.check()?;
            match answers.recv_timeout(self.poll) {
                Ok(ConsentAnswer::Accept(response)) => return Ok(response),
                Ok(ConsentAnswer::Decline) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(IfdError::CancellationByUser);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}
