//! Authentication: SRP math, client credentials and the backend-side relay.
//!
//! The proxy authenticates twice per session. Towards the client it plays
//! the server and checks proofs against a [`CredentialStore`]. Towards every
//! backend it plays the client, logging in as the player with an empty
//! password via an [`AuthRelay`]. The actual SRP arithmetic sits behind the
//! [`AuthMath`] trait.

use dashmap::DashMap;
use rand::RngCore;
use sha2::Sha256;
use srp::client::SrpClient;
use srp::groups::G_2048;
use srp::server::SrpServer;
use voxmux_net::messages::{
    AuthMethods, FirstSrp, Hello, SERIALIZE_VER, SrpBytesA, SrpBytesM, ToSrvCmd,
};

const SALT_LEN: usize = 16;
const SECRET_LEN: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AuthMathError {
    /// The peer's values or proof failed SRP's checks.
    #[error("SRP safety check failed")]
    SafetyCheck,
    #[error("SRP handshake failed: {0}")]
    Handshake(String),
}

/// Client half of an exchange in progress.
#[derive(Clone)]
pub struct ClientHandshake {
    pub a_pub: Vec<u8>,
    secret: Vec<u8>,
}

/// Result of the client half.
#[derive(Debug, Clone)]
pub struct SessionProof {
    pub key: Vec<u8>,
    pub proof: Vec<u8>,
}

/// Server half of an exchange in progress.
#[derive(Clone)]
pub struct ServerChallenge {
    pub b_pub: Vec<u8>,
    secret: Vec<u8>,
}

/// SRP primitives for both roles.
pub trait AuthMath: Send + Sync {
    /// Salt and verifier for a new account.
    fn new_verifier(&self, identity: &str, password: &[u8]) -> (Vec<u8>, Vec<u8>);

    /// Start a login: pick a secret and compute `A`.
    fn initiate(&self) -> ClientHandshake;

    /// Answer the server's salt and `B` with the client proof.
    fn complete(
        &self,
        handshake: &ClientHandshake,
        identity: &str,
        password: &[u8],
        salt: &[u8],
        b_pub: &[u8],
    ) -> Result<SessionProof, AuthMathError>;

    /// Server side: compute `B` for a stored verifier.
    fn challenge(&self, verifier: &[u8]) -> ServerChallenge;

    /// Server side: check the client proof. Returns the session key.
    fn verify(
        &self,
        challenge: &ServerChallenge,
        verifier: &[u8],
        a_pub: &[u8],
        client_proof: &[u8],
    ) -> Result<Vec<u8>, AuthMathError>;
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// SRP-6a over the 2048-bit group with SHA-256.
#[derive(Debug, Default, Clone, Copy)]
pub struct SrpAuth;

impl AuthMath for SrpAuth {
    fn new_verifier(&self, identity: &str, password: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let salt = random_bytes(SALT_LEN);
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier = client.compute_verifier(identity.as_bytes(), password, &salt);
        (salt, verifier)
    }

    fn initiate(&self) -> ClientHandshake {
        let secret = random_bytes(SECRET_LEN);
        let client = SrpClient::<Sha256>::new(&G_2048);
        ClientHandshake {
            a_pub: client.compute_public_ephemeral(&secret),
            secret,
        }
    }

    fn complete(
        &self,
        handshake: &ClientHandshake,
        identity: &str,
        password: &[u8],
        salt: &[u8],
        b_pub: &[u8],
    ) -> Result<SessionProof, AuthMathError> {
        if salt.is_empty() || b_pub.is_empty() {
            return Err(AuthMathError::Handshake("empty salt or B".into()));
        }
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier = client
            .process_reply(&handshake.secret, identity.as_bytes(), password, salt, b_pub)
            .map_err(|e| {
                tracing::debug!("srp reply rejected: {e:?}");
                AuthMathError::SafetyCheck
            })?;
        Ok(SessionProof {
            key: verifier.key().to_vec(),
            proof: verifier.proof().to_vec(),
        })
    }

    fn challenge(&self, verifier: &[u8]) -> ServerChallenge {
        let secret = random_bytes(SECRET_LEN);
        let server = SrpServer::<Sha256>::new(&G_2048);
        ServerChallenge {
            b_pub: server.compute_public_ephemeral(&secret, verifier),
            secret,
        }
    }

    fn verify(
        &self,
        challenge: &ServerChallenge,
        verifier: &[u8],
        a_pub: &[u8],
        client_proof: &[u8],
    ) -> Result<Vec<u8>, AuthMathError> {
        if a_pub.is_empty() || client_proof.is_empty() {
            return Err(AuthMathError::Handshake("empty A or M".into()));
        }
        let server = SrpServer::<Sha256>::new(&G_2048);
        let session = server
            .process_reply(&challenge.secret, verifier, a_pub)
            .map_err(|e| AuthMathError::Handshake(format!("{e:?}")))?;
        session
            .verify_client(client_proof)
            .map_err(|_| AuthMathError::SafetyCheck)?;
        Ok(session.key().to_vec())
    }
}

/// Stored SRP credentials of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
}

/// In-memory accounts of clients connecting to the proxy, keyed by
/// lower-cased player name.
#[derive(Default)]
pub struct CredentialStore {
    accounts: DashMap<String, Credentials>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Credentials> {
        self.accounts
            .get(&name.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accounts.contains_key(&name.to_lowercase())
    }

    pub fn set(&self, name: &str, credentials: Credentials) {
        self.accounts.insert(name.to_lowercase(), credentials);
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RelayError {
    #[error("invalid serialization version {0}")]
    SerializeVersion(u8),
    #[error("unexpected authentication")]
    UnexpectedAuth,
    #[error("server offers no usable auth method")]
    InvalidMethod,
    #[error("multiple authentication attempts")]
    MultipleAttempts,
    #[error(transparent)]
    Math(#[from] AuthMathError),
}

enum RelayPhase {
    Idle,
    FirstSrp,
    Srp(ClientHandshake),
    Done,
}

/// Logs in to a backend on behalf of a player.
///
/// The relay is driven by the backend link's receive loop and never talks to
/// the network itself; each step returns the command to send.
pub struct AuthRelay {
    math: std::sync::Arc<dyn AuthMath>,
    identity: String,
    phase: RelayPhase,
}

impl AuthRelay {
    pub fn new(math: std::sync::Arc<dyn AuthMath>, player_name: &str) -> Self {
        Self {
            math,
            identity: player_name.to_lowercase(),
            phase: RelayPhase::Idle,
        }
    }

    /// Pick a method from the server's `Hello`, preferring first login.
    pub fn on_hello(&mut self, hello: &Hello) -> Result<ToSrvCmd, RelayError> {
        if hello.serialize_ver != SERIALIZE_VER {
            return Err(RelayError::SerializeVersion(hello.serialize_ver));
        }
        if !matches!(self.phase, RelayPhase::Idle) {
            return Err(RelayError::UnexpectedAuth);
        }

        if hello.auth_methods.contains(AuthMethods::FIRST_SRP) {
            let (salt, verifier) = self.math.new_verifier(&self.identity, b"");
            self.phase = RelayPhase::FirstSrp;
            Ok(ToSrvCmd::FirstSrp(FirstSrp {
                salt,
                verifier,
                empty_passwd: true,
            }))
        } else if hello.auth_methods.contains(AuthMethods::SRP) {
            let handshake = self.math.initiate();
            let a = handshake.a_pub.clone();
            self.phase = RelayPhase::Srp(handshake);
            Ok(ToSrvCmd::SrpBytesA(SrpBytesA { a, no_sha1: true }))
        } else {
            Err(RelayError::InvalidMethod)
        }
    }

    /// Answer the server's challenge with the proof.
    pub fn on_salt_b(&mut self, salt: &[u8], b: &[u8]) -> Result<ToSrvCmd, RelayError> {
        let RelayPhase::Srp(handshake) = &self.phase else {
            return Err(RelayError::MultipleAttempts);
        };
        let proof = self
            .math
            .complete(handshake, &self.identity, b"", salt, b)?;
        Ok(ToSrvCmd::SrpBytesM(SrpBytesM { m: proof.proof }))
    }

    pub fn on_accept(&mut self) {
        self.phase = RelayPhase::Done;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, RelayPhase::Done)
    }
}
