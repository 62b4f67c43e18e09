//! gRPC endpoint the simulator connects to.
//!
//! The player drives the conversation: it calls `Exchange` with its latest
//! output and blocks until the trainer answers with the next input. Every
//! inbound call is handed to the environment as a rendezvous, and the
//! environment's next `respond` completes that call.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::communicator_objects::unity_to_external_proto_server::{
    UnityToExternalProto, UnityToExternalProtoServer,
};
use crate::communicator_objects::{HeaderProto, UnityInputProto, UnityMessageProto};
use crate::error::{EnvError, LaunchFailure, Result};

pub const STATUS_OK: i32 = 200;
pub const STATUS_CLOSE: i32 = 400;

const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct PendingExchange {
    message: UnityMessageProto,
    reply: oneshot::Sender<UnityMessageProto>,
}

struct ExchangeService {
    inbox: mpsc::Sender<PendingExchange>,
}

#[tonic::async_trait]
impl UnityToExternalProto for ExchangeService {
    async fn exchange(
        &self,
        request: Request<UnityMessageProto>,
    ) -> Result<Response<UnityMessageProto>, Status> {
        let (reply, answer) = oneshot::channel();
        self.inbox
            .send(PendingExchange {
                message: request.into_inner(),
                reply,
            })
            .await
            .map_err(|_| Status::unavailable("environment is shutting down"))?;

        let message = answer
            .await
            .map_err(|_| Status::cancelled("environment dropped the exchange"))?;
        Ok(Response::new(message))
    }
}

pub struct Communicator {
    port: u16,
    inbox: mpsc::Receiver<PendingExchange>,
    pending: Option<oneshot::Sender<UnityMessageProto>>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl Communicator {
    /// Binds the port up front so a collision surfaces before anything is spawned.
    pub async fn bind(port: u16) -> Result<Self> {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| LaunchFailure::PortUnavailable { port, source })?;

        let (inbox_tx, inbox) = mpsc::channel(1);
        let (shutdown, stop) = oneshot::channel::<()>();
        let service = UnityToExternalProtoServer::new(ExchangeService { inbox: inbox_tx })
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);

        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = stop.await;
                })
                .await
        });
        debug!("communicator listening on {}", address);

        Ok(Self {
            port,
            inbox,
            pending: None,
            shutdown: Some(shutdown),
            server: Some(server),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Waits for the simulator's next `Exchange` call and keeps it open
    /// until [`Communicator::respond`].
    pub async fn receive(&mut self) -> Result<UnityMessageProto> {
        let exchange = self
            .inbox
            .recv()
            .await
            .ok_or_else(|| EnvError::protocol("communicator stopped"))?;
        if self.pending.replace(exchange.reply).is_some() {
            warn!("simulator issued a new exchange before the previous one was answered");
        }
        Ok(exchange.message)
    }

    /// Answers the open exchange.
    pub fn respond(&mut self, message: UnityMessageProto) -> Result<()> {
        let reply = self
            .pending
            .take()
            .ok_or_else(|| EnvError::protocol("no simulator exchange is waiting for input"))?;
        reply
            .send(message)
            .map_err(|_| EnvError::protocol("simulator hung up before the input was delivered"))
    }

    /// Tells the simulator to quit and stops serving.
    pub async fn close(&mut self) {
        if self.pending.is_some() {
            let message = UnityMessageProto {
                header: Some(HeaderProto {
                    status: STATUS_CLOSE,
                    message: String::new(),
                }),
                ..Default::default()
            };
            if self.respond(message).is_err() {
                debug!("simulator was gone before the close message");
            }
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.inbox.close();

        if let Some(mut server) = self.server.take() {
            match tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => warn!("communicator on port {} failed: {}", self.port, err),
                Ok(Err(err)) => warn!("communicator task on port {} ended: {}", self.port, err),
                Err(_) => {
                    warn!("communicator on port {} did not stop in time", self.port);
                    server.abort();
                }
            }
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Wraps a trainer input in a 200 envelope.
pub fn wrap_input(input: UnityInputProto) -> UnityMessageProto {
    UnityMessageProto {
        header: Some(HeaderProto {
            status: STATUS_OK,
            message: String::new(),
        }),
        unity_output: None,
        unity_input: Some(input),
    }
}

pub fn header_status(message: &UnityMessageProto) -> i32 {
    message.header.as_ref().map(|h| h.status).unwrap_or(STATUS_OK)
}
