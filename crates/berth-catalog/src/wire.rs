//! Wire protocol between the remote catalog client and the daemon.
//!
//! Framing: 4-byte big-endian payload length, then a JSON-encoded
//! [`CatalogRequest`] or [`CatalogResponse`]. One request per frame,
//! one response frame back. Errors travel as the stable `Err` string
//! of [`berth_core::CoreError`] and are re-parsed on the client side,
//! so `VersionMismatch` keeps its meaning across the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use berth_core::{
    ConfigFile, CoreError, CoreResult, Device, Service, ServiceAttr, ServiceMember,
    ServiceStaticIP,
};

/// Upper bound on a frame payload; anything larger is a protocol error.
pub const MAX_FRAME_BYTES: u32 = 4 * 1024 * 1024;

/// One catalog RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum CatalogRequest {
    Ping,

    CreateDevice { device: Device },
    GetDevice { cluster: String, device_name: String },
    DeleteDevice { cluster: String, device_name: String },

    CreateService { service: Service },
    GetService { cluster: String, service_name: String },
    ListServices,
    DeleteService { cluster: String, service_name: String },

    CreateServiceAttr { attr: Box<ServiceAttr> },
    GetServiceAttr { service_uuid: String },
    UpdateServiceAttr { prior: Box<ServiceAttr>, new: Box<ServiceAttr> },
    DeleteServiceAttr { service_uuid: String },

    CreateServiceMember { member: Box<ServiceMember> },
    GetServiceMember { service_uuid: String, member_name: String },
    UpdateServiceMember { prior: Box<ServiceMember>, new: Box<ServiceMember> },
    DeleteServiceMember { service_uuid: String, member_name: String },
    ListServiceMembers { service_uuid: String },

    CreateConfigFile { file: Box<ConfigFile> },
    GetConfigFile { service_uuid: String, file_id: String },
    DeleteConfigFile { service_uuid: String, file_id: String },

    CreateServiceStaticIp { ip: ServiceStaticIP },
    GetServiceStaticIp { static_ip: String },
    UpdateServiceStaticIp { prior: ServiceStaticIP, new: ServiceStaticIP },
    DeleteServiceStaticIp { static_ip: String },
}

/// The single response frame for a [`CatalogRequest`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", content = "data")]
pub enum CatalogResponse {
    Unit,
    Device(Device),
    Service(Service),
    Services(Vec<Service>),
    ServiceAttr(Box<ServiceAttr>),
    ServiceMember(Box<ServiceMember>),
    ServiceMembers(Vec<ServiceMember>),
    ConfigFile(Box<ConfigFile>),
    ServiceStaticIp(ServiceStaticIP),
    /// Stable `Kind: detail` error string.
    Error(String),
}

impl CatalogResponse {
    pub fn from_err(e: &CoreError) -> Self {
        CatalogResponse::Error(e.to_string())
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> CoreResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg).map_err(|e| CoreError::DbError(e.to_string()))?;
    if payload.len() as u32 > MAX_FRAME_BYTES {
        return Err(CoreError::DbError(format!(
            "frame of {} bytes exceeds protocol limit",
            payload.len()
        )));
    }
    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| CoreError::DbError(e.to_string()))?;
    writer
        .write_all(&payload)
        .await
        .map_err(|e| CoreError::DbError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| CoreError::DbError(e.to_string()))?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `None` on a clean close
/// before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> CoreResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CoreError::DbError(e.to_string())),
    };
    if len > MAX_FRAME_BYTES {
        return Err(CoreError::DbError(format!(
            "frame of {len} bytes exceeds protocol limit"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| CoreError::DbError(e.to_string()))?;
    let msg = serde_json::from_slice(&payload).map_err(|e| CoreError::DbError(e.to_string()))?;
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let req = CatalogRequest::GetServiceAttr {
            service_uuid: "uuid1".to_string(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &req).await.unwrap();
        // 4-byte prefix, then the JSON payload.
        let len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(len, buf.len() - 4);

        let mut reader = std::io::Cursor::new(buf);
        let decoded: CatalogRequest = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(
            decoded,
            CatalogRequest::GetServiceAttr { service_uuid } if service_uuid == "uuid1"
        ));
    }

    #[tokio::test]
    async fn clean_eof_reads_none() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        let decoded: Option<CatalogRequest> = read_frame(&mut reader).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut reader = std::io::Cursor::new(buf);
        let res: CoreResult<Option<CatalogRequest>> = read_frame(&mut reader).await;
        assert!(matches!(res, Err(CoreError::DbError(_))));
    }

    #[tokio::test]
    async fn error_response_keeps_kind() {
        let resp = CatalogResponse::from_err(&CoreError::VersionMismatch("uuid1/m-0".into()));
        let mut buf = Vec::new();
        write_frame(&mut buf, &resp).await.unwrap();
        let mut reader = std::io::Cursor::new(buf);
        let decoded: CatalogResponse = read_frame(&mut reader).await.unwrap().unwrap();
        match decoded {
            CatalogResponse::Error(s) => {
                assert!(matches!(
                    CoreError::from_err_string(&s),
                    CoreError::VersionMismatch(_)
                ));
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }
}
