mod subscription;
mod support;
