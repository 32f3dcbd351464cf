//! Service/RPC adapter.
//!
//! Binds a schema's `service` declarations to a caller-supplied transport.
//! Each call encodes the request via the request type's codec, hands the
//! bytes to the transport, and decodes the reply via the response type's
//! codec. Outcomes are always delivered through the caller's callback, never
//! returned from the initiating function, so local failures (including calls
//! after [RpcService::end]) are indistinguishable from transport completion.

use thiserror::Error;

use tagwire_reflect::{DynamicMessage, NodeKind, Root, SchemaError};

/// Describes one callable method of a bound service.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub service: String,
    pub name: String,
    /// Fully qualified request/response type names.
    pub request_type: String,
    pub response_type: String,
    pub request_stream: bool,
    pub response_stream: bool,
}

/// What the transport hands back for one call.
pub enum RpcReply {
    /// Encoded response bytes, decoded against the method's response type.
    Bytes(Vec<u8>),
    /// An already-decoded response instance; decoding is skipped.
    Message(DynamicMessage),
    /// The transport is done. The service ends; no callback fires for this
    /// call, and every later call fails with [RpcError::Ended].
    End,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("the service has already ended")]
    Ended,

    #[error("no method {0:?} on this service")]
    NoSuchMethod(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The transport contract: given a method descriptor and encoded request
/// bytes, produce a reply or an error.
pub type Transport<'a> = Box<dyn FnMut(&MethodInfo, &[u8]) -> Result<RpcReply, RpcError> + 'a>;

/// A service bound to a transport.
pub struct RpcService<'r> {
    root: &'r Root,
    methods: Vec<MethodInfo>,
    transport: Transport<'r>,
    ended: bool,
}

impl<'r> RpcService<'r> {
    /// Bind the named service from `root` to `transport`. The root must be
    /// resolved so request/response types carry their full names.
    pub fn new(
        root: &'r Root,
        service_path: &str,
        transport: Transport<'r>,
    ) -> Result<RpcService<'r>, SchemaError> {
        let service_id = root
            .lookup(root.root_id(), service_path, tagwire_reflect::Filter::Service)
            .ok_or_else(|| SchemaError::NoSuchType(service_path.to_owned()))?;
        let service_name = root.fqn(service_id);
        let method_ids = match root.node(service_id).kind {
            NodeKind::Service(ref data) => data.methods.clone(),
            _ => Vec::new(),
        };
        let mut methods = Vec::new();
        for method_id in method_ids {
            let method = match root.node(method_id).as_method() {
                Some(m) => m,
                None => continue,
            };
            let request_type = match method.resolved_request {
                Some(id) => root.fqn(id),
                None => return Err(SchemaError::NotResolved),
            };
            let response_type = match method.resolved_response {
                Some(id) => root.fqn(id),
                None => return Err(SchemaError::NotResolved),
            };
            methods.push(MethodInfo {
                service: service_name.clone(),
                name: root.node(method_id).name().to_owned(),
                request_type,
                response_type,
                request_stream: method.request_stream,
                response_stream: method.response_stream,
            });
        }
        Ok(RpcService {
            root,
            methods,
            transport,
            ended: false,
        })
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Invoke `method` with `request`, delivering the outcome through
    /// `callback`. The callback fires at most once; it does not fire when the
    /// transport replies [RpcReply::End].
    pub fn call(
        &mut self,
        method: &str,
        request: &DynamicMessage,
        callback: &mut dyn FnMut(Result<DynamicMessage, RpcError>),
    ) {
        if self.ended {
            callback(Err(RpcError::Ended));
            return;
        }
        let info = match self.methods.iter().find(|m| m.name == method) {
            Some(info) => info.clone(),
            None => {
                callback(Err(RpcError::NoSuchMethod(method.to_owned())));
                return;
            }
        };
        let bytes = match self.root.encode(request) {
            Ok(bytes) => bytes,
            Err(e) => {
                callback(Err(e.into()));
                return;
            }
        };
        match (self.transport)(&info, &bytes) {
            Ok(RpcReply::Bytes(reply)) => {
                callback(
                    self.root
                        .decode(&info.response_type, &reply)
                        .map_err(RpcError::from),
                );
            }
            Ok(RpcReply::Message(message)) => callback(Ok(message)),
            Ok(RpcReply::End) => {
                log::debug!("transport ended service {}", info.service);
                self.ended = true;
            }
            Err(e) => callback(Err(e)),
        }
    }

    /// Convenience wrapper returning the callback's outcome. A call the
    /// transport answered with [RpcReply::End] reports [RpcError::Ended].
    pub fn call_returning(
        &mut self,
        method: &str,
        request: &DynamicMessage,
    ) -> Result<DynamicMessage, RpcError> {
        let mut outcome = None;
        self.call(method, request, &mut |result| outcome = Some(result));
        outcome.unwrap_or(Err(RpcError::Ended))
    }

    /// End the service. Every later call fails with [RpcError::Ended]
    /// through its callback.
    pub fn end(&mut self) {
        self.ended = true;
    }
}
