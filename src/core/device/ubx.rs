//! u-blox command helpers

use tokio_util::sync::CancellationToken;

use super::{Acknowledgement, CommandError, CommandProtocol, Completion, Device, Reply};
use crate::core::message::{GnssMessage, ProtocolMessage};
use crate::core::protocol::ubx::{CfgMsg, CfgRate, MonVer, UbxId, UbxMessage, UbxPayload};

/// UBX correlation: ACK/NAK carry the acknowledged class/id, replies share
/// the class/id of their poll
pub struct UbxCommands;

impl CommandProtocol for UbxCommands {
    type Message = UbxMessage;
    type Key = UbxId;

    fn extract(message: &GnssMessage) -> Option<&UbxMessage> {
        message.as_ubx()
    }

    fn wrap(message: UbxMessage) -> GnssMessage {
        GnssMessage::Ubx(message)
    }

    fn key(message: &UbxMessage) -> UbxId {
        message.message_id()
    }

    fn acknowledgement(message: &UbxMessage) -> Option<Acknowledgement<UbxId>> {
        match &message.payload {
            UbxPayload::AckAck(ack) => Some(Acknowledgement::Ack(ack.target)),
            UbxPayload::AckNak(ack) => Some(Acknowledgement::Nak(ack.target)),
            _ => None,
        }
    }
}

impl Reply<UbxCommands> for MonVer {
    fn from_message(message: &UbxMessage) -> Option<Self> {
        match &message.payload {
            UbxPayload::MonVer(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl Reply<UbxCommands> for CfgRate {
    fn from_message(message: &UbxMessage) -> Option<Self> {
        match &message.payload {
            UbxPayload::CfgRate(r) => Some(r.clone()),
            _ => None,
        }
    }
}

impl Reply<UbxCommands> for CfgMsg {
    fn from_message(message: &UbxMessage) -> Option<Self> {
        match &message.payload {
            UbxPayload::CfgMsg(m) => Some(m.clone()),
            _ => None,
        }
    }
}

/// Device speaking UBX
pub type UbxDevice = Device<UbxCommands>;

impl Device<UbxCommands> {
    /// Poll MON-VER
    pub async fn read_version(&self, cancel: &CancellationToken) -> Result<Completion<MonVer>, CommandError> {
        self.poll(UbxMessage::poll(UbxId::MON_VER), cancel).await
    }

    /// Bring the receiver up by reading its version
    ///
    /// Fails with [`CommandError::Busy`] while another bring-up is running.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<Completion<MonVer>, CommandError> {
        self.begin_initialize()?;
        let result = self.read_version(cancel).await;
        let ready = matches!(result, Ok(Completion::Done(_)));
        self.end_initialize(ready);
        match &result {
            Ok(Completion::Done(version)) => {
                tracing::info!(
                    "Receiver on {} ready: {} / {}",
                    self.connection().name(),
                    version.sw_version,
                    version.hw_version
                );
            }
            Ok(Completion::Stopped) => {}
            Err(e) => tracing::warn!("Receiver bring-up failed: {}", e),
        }
        result
    }

    /// Set the measurement period and navigation rate (CFG-RATE)
    pub async fn set_rate(
        &self,
        meas_rate_ms: u16,
        nav_rate: u16,
        cancel: &CancellationToken,
    ) -> Result<Completion<()>, CommandError> {
        let rate = CfgRate {
            meas_rate_ms,
            nav_rate,
            time_ref: 1,
        };
        self.push(UbxMessage::new(UbxPayload::CfgRate(rate)), cancel).await
    }

    /// Read the current CFG-RATE
    pub async fn poll_rate(&self, cancel: &CancellationToken) -> Result<Completion<CfgRate>, CommandError> {
        self.poll(UbxMessage::poll(UbxId::CFG_RATE), cancel).await
    }

    /// Set the output rate of `target` on the current port (CFG-MSG)
    pub async fn set_message_rate(
        &self,
        target: UbxId,
        rate: u8,
        cancel: &CancellationToken,
    ) -> Result<Completion<()>, CommandError> {
        let msg = CfgMsg {
            target,
            rate,
            port_rates: None,
        };
        self.push(UbxMessage::new(UbxPayload::CfgMsg(msg)), cancel).await
    }
}
