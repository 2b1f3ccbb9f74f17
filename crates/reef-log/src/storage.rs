//! The four byte stores backing one log.

use std::sync::Arc;

use bytes::Bytes;
use reef_store::{RandomAccess, StorageProvider};
use reef_types::LogKind;

use crate::error::LogError;
use crate::node::{NODE_SIZE, Node};

/// Tree nodes, block data, presence bits and the committed header.
pub(crate) struct LogStorage {
    pub tree: Arc<dyn RandomAccess>,
    pub data: Arc<dyn RandomAccess>,
    pub bitfield: Arc<dyn RandomAccess>,
    pub header: Arc<dyn RandomAccess>,
}

impl LogStorage {
    /// Open `<kind>/tree`, `<kind>/data`, `<kind>/bitfield` and `<kind>/header`.
    pub async fn open(provider: &dyn StorageProvider, kind: LogKind) -> Result<Self, LogError> {
        let name = kind.name();
        Ok(Self {
            tree: provider.open(&format!("{name}/tree")).await?,
            data: provider.open(&format!("{name}/data")).await?,
            bitfield: provider.open(&format!("{name}/bitfield")).await?,
            header: provider.open(&format!("{name}/header")).await?,
        })
    }

    pub async fn read_node(&self, index: u64) -> Result<Option<Node>, LogError> {
        let slot = self.tree.try_read(index * NODE_SIZE, NODE_SIZE).await?;
        Ok(slot.and_then(|slot| Node::decode(index, &slot)))
    }

    pub async fn write_nodes(&self, nodes: &[Node]) -> Result<(), LogError> {
        for node in nodes {
            self.tree.write(node.index * NODE_SIZE, &node.encode()).await?;
        }
        Ok(())
    }

    pub async fn read_data(&self, offset: u64, len: u64) -> Result<Bytes, LogError> {
        Ok(self.data.read(offset, len).await?)
    }

    pub async fn write_data(&self, offset: u64, data: &[u8]) -> Result<(), LogError> {
        self.data.write(offset, data).await?;
        Ok(())
    }

    pub async fn read_bitfield(&self) -> Result<Bytes, LogError> {
        let len = self.bitfield.len().await?;
        Ok(self.bitfield.read(0, len).await?)
    }

    pub async fn write_bitfield_byte(&self, byte_index: u64, byte: u8) -> Result<(), LogError> {
        self.bitfield.write(byte_index, &[byte]).await?;
        Ok(())
    }

    pub async fn sync(&self) -> Result<(), LogError> {
        self.tree.sync().await?;
        self.data.sync().await?;
        self.bitfield.sync().await?;
        Ok(())
    }
}
