//! 操作员接口
//!
//! 等待超时与校验失败是唯一会面向操作员提问的地方，提问永远
//! 与一条遥测事件成对出现。没有任何一步会自动重试：每次重试
//! 都是操作员的显式选择。

use std::collections::VecDeque;

/// 操作员对一次错误提示的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorChoice {
    /// 中止整个运行
    Abort,
    /// 以新的超时重做当前步骤
    Retry,
    /// 接受失败并继续
    Ignore,
}

/// 操作员决定来源
///
/// CLI 以交互式选单实现；测试与无人值守运行用
/// [`ScriptedOperator`]。
pub trait OperatorInterface {
    /// 呈现一条人类可读的错误信息并取回决定
    fn signal_error(&mut self, message: &str) -> OperatorChoice;
}

/// 照脚本回答的操作员
///
/// 依次弹出预置的选择，脚本耗尽后回落到默认选择；所有收到的
/// 提示保留在 `prompts` 里供断言。
#[derive(Debug)]
pub struct ScriptedOperator {
    choices: VecDeque<OperatorChoice>,
    default: OperatorChoice,
    /// 收到过的全部提示
    pub prompts: Vec<String>,
}

impl ScriptedOperator {
    /// 空脚本：每次都回答 `default`
    pub fn new(default: OperatorChoice) -> Self {
        Self {
            choices: VecDeque::new(),
            default,
            prompts: Vec::new(),
        }
    }

    /// 追加一个脚本化选择
    pub fn then(mut self, choice: OperatorChoice) -> Self {
        self.choices.push_back(choice);
        self
    }
}

impl OperatorInterface for ScriptedOperator {
    fn signal_error(&mut self, message: &str) -> OperatorChoice {
        self.prompts.push(message.to_string());
        self.choices.pop_front().unwrap_or(self.default)
    }
}
