use parley_voice::{PiperTts, TextToSpeech, VoiceError};

#[tokio::test]
async fn test_tts_missing_model_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let tts = PiperTts::new("piper", temp_dir.path().join("missing.onnx"));

    let result = tts.synthesize("Hello").await;
    match result {
        Err(VoiceError::Tts(msg)) => assert!(msg.contains("Model file not found")),
        _ => panic!("Expected Tts error about missing model, got {:?}", result),
    }
}

#[tokio::test]
async fn test_tts_invalid_speed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let model_path = temp_dir.path().join("test.onnx");
    std::fs::File::create(&model_path).unwrap();

    // Zero speed is below the minimum (0.1)
    let tts = PiperTts::new("piper", &model_path).with_speed(0.0);
    let result = tts.synthesize("Hello").await;
    match result {
        Err(VoiceError::Config(msg)) => assert!(msg.contains("Speed")),
        _ => panic!("Expected Config error for invalid speed, got {:?}", result),
    }
}

#[tokio::test]
async fn test_tts_rejects_oversized_text() {
    let temp_dir = tempfile::tempdir().unwrap();
    let model_path = temp_dir.path().join("test.onnx");
    std::fs::File::create(&model_path).unwrap();

    let tts = PiperTts::new("piper", &model_path);
    let text = "a".repeat(64 * 1024 + 1);
    let result = tts.synthesize(&text).await;
    match result {
        Err(VoiceError::InputTooLarge { size, limit }) => {
            assert_eq!(size, 64 * 1024 + 1);
            assert_eq!(limit, 64 * 1024);
        }
        _ => panic!("Expected InputTooLarge, got {:?}", result),
    }
}

#[tokio::test]
async fn test_tts_missing_binary() {
    let temp_dir = tempfile::tempdir().unwrap();
    let model_path = temp_dir.path().join("test.onnx");
    std::fs::File::create(&model_path).unwrap();

    let tts = PiperTts::new(temp_dir.path().join("no-piper-here"), &model_path);
    let result = tts.synthesize("Hello").await;
    match result {
        Err(VoiceError::Tts(msg)) => assert!(msg.contains("Failed to spawn piper")),
        _ => panic!("Expected spawn failure, got {:?}", result),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_tts_returns_stdout_pcm() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().unwrap();
    let model_path = temp_dir.path().join("test.onnx");
    std::fs::File::create(&model_path).unwrap();

    // Fake piper: consume the text, emit four bytes of "PCM".
    let script = temp_dir.path().join("fake-piper.sh");
    std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\nprintf 'abcd'\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let tts = PiperTts::new(&script, &model_path);
    let pcm = tts.synthesize("Hello there.").await.unwrap();
    assert_eq!(pcm, b"abcd");
}
