use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::future::BoxFuture;
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::{
    cache::FileCache,
    context::Context,
    middleware::Handler,
    response::{get_mime, Response},
};

/// 处理 `/static/*filepath`，不生成目录列表
pub struct StaticFiles {
    root: PathBuf,
    cache: Mutex<FileCache>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>, cache_size: usize) -> Self {
        StaticFiles {
            root: root.into(),
            cache: Mutex::new(FileCache::from_capacity(cache_size)),
        }
    }

    /// 把请求中的相对路径映射到磁盘路径；目录形式与越界路径返回 `None`
    fn resolve(&self, filepath: &str) -> Option<PathBuf> {
        if filepath.is_empty() || filepath.ends_with('/') {
            return None;
        }
        let relative = Path::new(filepath);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return None;
        }
        Some(self.root.join(relative))
    }

    async fn serve(&self, ctx: &mut Context) -> Response {
        let id = ctx.id();
        let filepath = ctx.param("filepath").unwrap_or_default().to_string();
        let Some(path) = self.resolve(&filepath) else {
            debug!("[ID{}]拒绝静态资源路径: {:?}", id, filepath);
            return Response::from_status_code(404);
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                debug!("[ID{}]{} 是目录，返回404", id, path.display());
                return Response::from_status_code(404);
            }
            Err(_) => {
                warn!("[ID{}]请求的路径：{} 不存在，返回404", id, path.display());
                return Response::from_status_code(404);
            }
        };
        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(e) => {
                error!("[ID{}]无法读取文件修改时间: {}", id, e);
                return Response::from_status_code(500);
            }
        };

        let cached = self.cache.lock().find(&filepath, modified);
        let content = match cached {
            Some(bytes) => {
                debug!("[ID{}]缓存命中: {}", id, filepath);
                bytes
            }
            None => match tokio::fs::read(&path).await {
                Ok(data) => {
                    let bytes = Bytes::from(data);
                    if FileCache::should_cache(metadata.len()) {
                        self.cache.lock().push(&filepath, bytes.clone(), modified);
                    }
                    bytes
                }
                Err(e) => {
                    error!("[ID{}]读取文件失败: {}", id, e);
                    return Response::from_status_code(500);
                }
            },
        };

        let mut response = Response::new();
        response.set_content(content, get_mime(path.extension()));
        response.compress_for(ctx.request().accept_encoding(), id);
        response
    }
}

impl Handler for StaticFiles {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Response> {
        Box::pin(self.serve(ctx))
    }
}
