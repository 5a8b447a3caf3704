use serde::{Deserialize, Serialize};

/// 项目记录：任务的工作目录与输出目录来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    /// 项目根目录绝对路径
    pub path: String,
    /// 相对工作目录，"./"表示直接使用项目根目录
    pub work_dir: String,
    /// 可选的输出目录覆盖，注入为OUTPUT_DIR等环境变量
    pub output_dir: Option<String>,
}

/// Python解释器环境记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonEnvironment {
    pub id: i64,
    /// 解释器可执行文件路径
    pub path: String,
}

/// 全局键值变量，注入到所有任务子进程
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub key: String,
    /// is_secret为true时存储密文，注入前需解密
    pub value: String,
    pub is_secret: bool,
}
