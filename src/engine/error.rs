// ==========================================
// 无人机机队维护调度系统 - 引擎层错误类型
// ==========================================
// 分类:
// - NotFound: 机体/触发条件/计划不存在，直接上抛，不重试
// - InvalidState: 终态/停用计划完工、触发条件配置错误
// - TransientCollaborator: 协作方超时/不可用，下一轮重试
// - ConcurrencyConflict: 乐观锁冲突，刷新重读后仍冲突时上抛
// ==========================================

use crate::engine::collaborators::CollaboratorError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("资源未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("状态不允许: {0}")]
    InvalidState(String),

    #[error("协作方暂时不可用: {0}")]
    TransientCollaborator(String),

    #[error("并发冲突: {entity} id={id}")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("运行已取消")]
    Cancelled,

    #[error(transparent)]
    Repository(RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 是否可在下一轮重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::TransientCollaborator(_) | EngineError::ConcurrencyConflict { .. }
        )
    }
}

// 仓储层的 NotFound / 乐观锁冲突映射为引擎分类，其余原样包装
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::OptimisticLockFailure { entity, id, .. } => {
                EngineError::ConcurrencyConflict { entity, id }
            }
            other => EngineError::Repository(other),
        }
    }
}

impl From<CollaboratorError> for EngineError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::TransientCollaborator(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
